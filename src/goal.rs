//! The `Goal` algebra and its Goals-JSON encoding.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RopError, SchedulerError};

/// One function argument: a plain integer or a byte string that must be
/// materialised into writable memory and replaced by its address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
    Int(i64),
    Bytes(Vec<u8>),
}

/// A high-level objective the [`crate::scheduler::Scheduler`] compiles
/// into gadget chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Goal {
    Function { name: String, address: Option<u64>, arguments: Vec<Arg> },
    Shellcode { bytes: Vec<u8> },
    ShellcodeAddress { address: u64 },
    Execve { name: String, address: Option<u64>, argv: Vec<Vec<u8>> },
}

/// One `(path, hex_base)` entry of the Goals JSON's `"files"` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub path: String,
    pub base_address: u64,
}

/// Parsed top-level Goals JSON.
#[derive(Debug, Clone)]
pub struct GoalFile {
    pub files: Vec<FileEntry>,
    pub goals: Vec<Goal>,
}

fn parse_hex_or_int(v: &Value) -> Option<u64> {
    match v {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => {
            let s = s.trim();
            if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
                u64::from_str_radix(hex, 16).ok()
            } else {
                s.parse().ok()
            }
        }
        _ => None,
    }
}

fn parse_goal(entry: &Value) -> Result<Goal, RopError> {
    let arr = entry.as_array().ok_or_else(|| RopError::CacheFormat("goal entry is not an array".into()))?;
    let tag = arr.first().and_then(Value::as_str).ok_or_else(|| RopError::CacheFormat("goal missing tag".into()))?;
    match tag {
        "function" => {
            let name_or_hex = arr.get(1).ok_or_else(|| RopError::CacheFormat("function goal missing name".into()))?;
            let (name, address) = match name_or_hex {
                Value::String(s) if s.starts_with("0x") => (String::new(), parse_hex_or_int(name_or_hex)),
                Value::String(s) => (s.clone(), None),
                other => (String::new(), parse_hex_or_int(other)),
            };
            let mut arguments = Vec::new();
            for a in &arr[2..] {
                arguments.push(match a {
                    Value::String(s) => Arg::Bytes(s.as_bytes().to_vec()),
                    other => Arg::Int(parse_hex_or_int(other).unwrap_or(0) as i64),
                });
            }
            Ok(Goal::Function { name, address, arguments })
        }
        "shellcode" => {
            let s = arr.get(1).and_then(Value::as_str).ok_or_else(|| RopError::CacheFormat("shellcode goal missing bytes".into()))?;
            Ok(Goal::Shellcode { bytes: s.as_bytes().to_vec() })
        }
        "shellcode_file" => {
            let path = arr.get(1).and_then(Value::as_str).ok_or_else(|| RopError::CacheFormat("shellcode_file goal missing path".into()))?;
            let bytes = std::fs::read(path)?;
            Ok(Goal::Shellcode { bytes })
        }
        "execve" => {
            let prog = arr.get(1).and_then(Value::as_str).ok_or_else(|| RopError::CacheFormat("execve goal missing program".into()))?;
            let argv_list = arr.get(2).and_then(Value::as_array).ok_or_else(|| RopError::CacheFormat("execve goal missing argv".into()))?;
            let argv = argv_list
                .iter()
                .map(|v| v.as_str().map(|s| s.as_bytes().to_vec()).unwrap_or_default())
                .collect();
            Ok(Goal::Execve { name: prog.to_string(), address: None, argv })
        }
        other => Err(SchedulerError::UnknownGoal(other.to_string()).into()),
    }
}

impl GoalFile {
    pub fn parse(json: &str) -> Result<Self, RopError> {
        let root: Value = serde_json::from_str(json)?;
        let files = root
            .get("files")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|entry| {
                        let pair = entry.as_array()?;
                        let path = pair.first()?.as_str()?.to_string();
                        let base_address = pair.get(1).and_then(parse_hex_or_int).unwrap_or(0);
                        Some(FileEntry { path, base_address })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let goals = root
            .get("goals")
            .and_then(Value::as_array)
            .ok_or_else(|| RopError::CacheFormat("goals JSON missing \"goals\" array".into()))?
            .iter()
            .map(parse_goal)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(GoalFile { files, goals })
    }
}
