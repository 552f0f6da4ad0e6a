use crate::arch::Arch;
use crate::models::MachineType;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref ALIAS_RE: Regex = Regex::new(r"\(alias of ([^)\n]*)\)").unwrap();
}

/// Parses the output of a legacy `-M ?` invocation. One record per line:
///
/// ```text
/// <machine> <desc> [(default)|(alias of <canonical>)]
/// ```
///
/// An `(alias of X)` marker swaps roles: the leading token becomes the
/// alias and `X` the canonical name. A canonical name listed both as an
/// alias target and as its own record yields a single entry carrying
/// the alias. If any record carried `(default)` it is rotated to index
/// 0, preserving the relative order of the rest.
pub(crate) fn parse_machine_listing(output: &str) -> Vec<MachineType> {
    let mut machines: Vec<MachineType> = Vec::new();
    let mut def_idx = 0;

    for line in output.lines() {
        if line.starts_with("Supported machines are:") {
            continue;
        }
        let Some(space) = line.find(' ') else {
            continue;
        };
        let name = &line[..space];
        let rest = &line[space..];

        let (canonical, alias) = if rest.contains("(alias of ") {
            // an unterminated alias marker invalidates the whole record
            let Some(caps) = ALIAS_RE.captures(rest) else {
                continue;
            };
            (caps[1].to_string(), Some(name))
        } else {
            (name.to_string(), None)
        };

        let idx = match machines.iter().position(|m| m.name == canonical) {
            Some(idx) => {
                if machines[idx].alias.is_none() {
                    machines[idx].alias = alias.map(str::to_string);
                }
                idx
            }
            None => {
                machines.push(MachineType {
                    name: canonical,
                    alias: alias.map(str::to_string),
                });
                machines.len() - 1
            }
        };

        if rest.contains("(default)") {
            def_idx = idx;
        }
    }

    if def_idx > 0 {
        let default = machines.remove(def_idx);
        machines.insert(0, default);
    }

    machines
}

pub(crate) type CpuModelParser = fn(&str) -> Vec<String>;

/// Selects the CPU-model listing parser for an architecture. `None`
/// means the architecture has no known listing format and the probe is
/// skipped, leaving the model list empty.
pub(crate) fn cpu_model_parser(arch: Arch) -> Option<CpuModelParser> {
    match arch {
        Arch::I686 | Arch::X86_64 => Some(parse_x86_models),
        Arch::Ppc64 => Some(parse_ppc_models),
        _ => None,
    }
}

/// Format: `x86 <model>`. qemu 0.13 encloses some model names in
/// brackets: `x86 [<model>]`. Preamble and blank lines are skipped.
fn parse_x86_models(output: &str) -> Vec<String> {
    let mut models = Vec::new();

    for line in output.lines() {
        let Some(space) = line.find(' ') else {
            continue;
        };
        if !line.starts_with("x86") {
            continue;
        }

        let mut model = line[space..].trim_start_matches(' ');
        if model.is_empty() {
            continue;
        }
        if model.len() > 2 && model.starts_with('[') && model.ends_with(']') {
            model = &model[1..model.len() - 1];
        }
        models.push(model.to_string());
    }

    models
}

/// Format: `PowerPC <model> <desc>`. Lines without a description token
/// are malformed and skipped.
fn parse_ppc_models(output: &str) -> Vec<String> {
    let mut models = Vec::new();

    for line in output.lines() {
        let Some(rest) = line.strip_prefix("PowerPC ") else {
            continue;
        };
        let Some(space) = rest.find(' ') else {
            continue;
        };
        let model = &rest[..space];
        if model.is_empty() {
            continue;
        }
        models.push(model.to_string());
    }

    models
}
