mod cache_tests;
mod device_tests;
mod listing_tests;
