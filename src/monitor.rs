use crate::error::{CapsError, CapsResult};
use crate::models::{KvmState, MachineEntry, MonitorVersion, NamedEntry};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::io;
use std::mem;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::time::timeout;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const REPLY_TIMEOUT: Duration = Duration::from_secs(30);

/// Event interface the monitor transport requires from its consumer.
/// All methods default to no-ops; a probe session has no domain
/// attached, so it installs [`NullCallbacks`].
pub trait MonitorCallbacks: Send {
    /// An asynchronous event arrived outside a command reply
    fn event(&self, _name: &str, _data: &Value) {}

    /// The emulator closed the monitor connection
    fn eof(&self) {}
}

/// No-op monitor callbacks.
pub struct NullCallbacks;

impl MonitorCallbacks for NullCallbacks {}

/// The structured monitor operations capability discovery relies on.
/// [`QmpMonitor`] implements this over a live socket; tests supply
/// scripted doubles.
#[async_trait]
pub trait MonitorOperations: Send {
    /// Capability negotiation handshake; must be the first command
    async fn negotiate(&mut self) -> CapsResult<()>;
    async fn version(&mut self) -> CapsResult<MonitorVersion>;
    async fn target_arch(&mut self) -> CapsResult<String>;
    async fn commands(&mut self) -> CapsResult<Vec<String>>;
    async fn events(&mut self) -> CapsResult<Vec<String>>;
    async fn object_types(&mut self) -> CapsResult<Vec<String>>;
    async fn object_properties(&mut self, type_name: &str) -> CapsResult<Vec<String>>;
    async fn machines(&mut self) -> CapsResult<Vec<MachineEntry>>;
    async fn cpu_definitions(&mut self) -> CapsResult<Vec<String>>;
    async fn kvm_state(&mut self) -> CapsResult<KvmState>;
    /// Registers a host file descriptor with the emulator, passed as
    /// SCM_RIGHTS ancillary data alongside the command
    async fn add_fd(&mut self, fdset_id: i64, fd: RawFd, opaque: &str) -> CapsResult<()>;
}

/// Line-delimited JSON monitor client over a unix domain socket.
pub struct QmpMonitor {
    stream: BufReader<UnixStream>,
    callbacks: Box<dyn MonitorCallbacks>,
}

impl QmpMonitor {
    /// Connects to the monitor socket and consumes the greeting banner.
    pub async fn open(path: &Path, callbacks: Box<dyn MonitorCallbacks>) -> CapsResult<Self> {
        let stream = timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
            .await
            .map_err(|_| CapsError::Timeout("connect".to_string()))??;

        let mut monitor = Self {
            stream: BufReader::new(stream),
            callbacks,
        };

        let greeting = monitor.recv("greeting").await?;
        if greeting.get("QMP").is_none() {
            return Err(CapsError::Protocol(
                "monitor did not send a QMP greeting".to_string(),
            ));
        }

        Ok(monitor)
    }

    /// Reads the next non-event message, dispatching events to the
    /// callbacks along the way.
    async fn recv(&mut self, context: &str) -> CapsResult<Value> {
        loop {
            let mut line = String::new();
            let n = timeout(REPLY_TIMEOUT, self.stream.read_line(&mut line))
                .await
                .map_err(|_| CapsError::Timeout(context.to_string()))??;

            if n == 0 {
                self.callbacks.eof();
                return Err(CapsError::Protocol(format!(
                    "monitor closed while waiting for {context}"
                )));
            }
            if line.trim().is_empty() {
                continue;
            }

            let msg: Value = serde_json::from_str(&line)?;
            if let Some(event) = msg.get("event").and_then(Value::as_str) {
                log::debug!("monitor event {event}");
                self.callbacks.event(event, msg.get("data").unwrap_or(&Value::Null));
                continue;
            }

            return Ok(msg);
        }
    }

    fn unwrap_reply(command: &str, msg: Value) -> CapsResult<Value> {
        if let Some(err) = msg.get("error") {
            let class = err
                .get("class")
                .and_then(Value::as_str)
                .unwrap_or("GenericError");
            let desc = err
                .get("desc")
                .and_then(Value::as_str)
                .unwrap_or("unknown error");
            return Err(CapsError::Command {
                command: command.to_string(),
                class: class.to_string(),
                desc: desc.to_string(),
            });
        }

        match msg.get("return") {
            Some(ret) => Ok(ret.clone()),
            None => Err(CapsError::Protocol(format!(
                "reply to '{command}' carries neither return nor error"
            ))),
        }
    }

    async fn execute(&mut self, command: &str, arguments: Option<Value>) -> CapsResult<Value> {
        let mut request = json!({ "execute": command });
        if let Some(args) = arguments {
            request["arguments"] = args;
        }

        let mut payload = serde_json::to_vec(&request)?;
        payload.extend_from_slice(b"\r\n");
        self.stream.get_mut().write_all(&payload).await?;

        let msg = self.recv(command).await?;
        Self::unwrap_reply(command, msg)
    }

    /// Like `execute`, but ships `fd` as SCM_RIGHTS ancillary data on
    /// the same message.
    async fn execute_with_fd(
        &mut self,
        command: &str,
        arguments: Value,
        fd: RawFd,
    ) -> CapsResult<Value> {
        let request = json!({ "execute": command, "arguments": arguments });
        let mut payload = serde_json::to_vec(&request)?;
        payload.extend_from_slice(b"\r\n");

        let mut sent = 0;
        loop {
            let sock = self.stream.get_ref();
            sock.writable().await?;
            match send_with_fd(sock.as_raw_fd(), &payload[sent..], fd) {
                Ok(n) => {
                    sent += n;
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) => return Err(e.into()),
            }
        }
        // the descriptor travels with the first fragment; the rest of
        // the payload, if any, goes out as plain data
        if sent < payload.len() {
            self.stream.get_mut().write_all(&payload[sent..]).await?;
        }

        let msg = self.recv(command).await?;
        Self::unwrap_reply(command, msg)
    }

    fn named_list(value: Value) -> CapsResult<Vec<String>> {
        let entries: Vec<NamedEntry> = serde_json::from_value(value)?;
        Ok(entries.into_iter().map(|e| e.name).collect())
    }
}

#[async_trait]
impl MonitorOperations for QmpMonitor {
    async fn negotiate(&mut self) -> CapsResult<()> {
        self.execute("qmp_capabilities", None).await.map(|_| ())
    }

    async fn version(&mut self) -> CapsResult<MonitorVersion> {
        let ret = self.execute("query-version", None).await?;
        Ok(serde_json::from_value(ret)?)
    }

    async fn target_arch(&mut self) -> CapsResult<String> {
        let ret = self.execute("query-target", None).await?;
        ret.get("arch")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| CapsError::Protocol("query-target reply lacks an arch".to_string()))
    }

    async fn commands(&mut self) -> CapsResult<Vec<String>> {
        let ret = self.execute("query-commands", None).await?;
        Self::named_list(ret)
    }

    async fn events(&mut self) -> CapsResult<Vec<String>> {
        let ret = self.execute("query-events", None).await?;
        Self::named_list(ret)
    }

    async fn object_types(&mut self) -> CapsResult<Vec<String>> {
        let ret = self
            .execute("qom-list-types", Some(json!({ "abstract": true })))
            .await?;
        Self::named_list(ret)
    }

    async fn object_properties(&mut self, type_name: &str) -> CapsResult<Vec<String>> {
        let ret = self
            .execute(
                "device-list-properties",
                Some(json!({ "typename": type_name })),
            )
            .await;
        match ret {
            Ok(value) => Self::named_list(value),
            // the binary simply does not have this device type
            Err(CapsError::Command { class, .. }) if class == "DeviceNotFound" => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    async fn machines(&mut self) -> CapsResult<Vec<MachineEntry>> {
        let ret = self.execute("query-machines", None).await?;
        Ok(serde_json::from_value(ret)?)
    }

    async fn cpu_definitions(&mut self) -> CapsResult<Vec<String>> {
        let ret = self.execute("query-cpu-definitions", None).await?;
        Self::named_list(ret)
    }

    async fn kvm_state(&mut self) -> CapsResult<KvmState> {
        let ret = self.execute("query-kvm", None).await?;
        Ok(serde_json::from_value(ret)?)
    }

    async fn add_fd(&mut self, fdset_id: i64, fd: RawFd, opaque: &str) -> CapsResult<()> {
        self.execute_with_fd(
            "add-fd",
            json!({ "fdset-id": fdset_id, "opaque": opaque }),
            fd,
        )
        .await
        .map(|_| ())
    }
}

/// `sendmsg` with one descriptor in a SCM_RIGHTS control message.
fn send_with_fd(sock: RawFd, buf: &[u8], fd: RawFd) -> io::Result<usize> {
    let mut iov = libc::iovec {
        iov_base: buf.as_ptr() as *mut libc::c_void,
        iov_len: buf.len(),
    };
    let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_space;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as usize;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);

        let n = libc::sendmsg(sock, &msg, libc::MSG_NOSIGNAL);
        if n < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(n as usize)
        }
    }
}
