use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{JsonAbi, Param},
    primitives::{Bytes, U256},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    errors::CodecError,
    tx::{ContractCodec, EncodedAction, ResolvedAction, ResolvedCall, Value},
};

/// A compiled contract, as emitted by Hardhat / Foundry (`abi` + creation `bytecode`)
#[derive(Debug, Clone, Deserialize)]
pub struct Artifact {
    #[serde(rename = "contractName", default)]
    pub contract_name: String,
    pub abi: JsonAbi,
    #[serde(deserialize_with = "deserialize_bytecode")]
    pub bytecode: Bytes,
}

/// Hardhat stores bytecode as a hex string, Foundry as `{ "object": "0x..." }`
fn deserialize_bytecode<'de, D>(deserializer: D) -> Result<Bytes, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Hex(Bytes),
        Object { object: Bytes },
    }
    Ok(match Raw::deserialize(deserializer)? {
        Raw::Hex(bytes) | Raw::Object { object: bytes } => bytes,
    })
}

/// Contract artifacts by name
#[derive(Debug, Clone, Default)]
pub struct ArtifactCatalog {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactCatalog {
    /// Load every `<Name>.json` artifact found under `dir`, recursively.
    ///
    /// Files that are not artifacts (debug files, build info) are skipped.
    pub fn load(dir: &Path) -> Result<Self, CodecError> {
        let mut catalog = Self::default();
        if !dir.exists() {
            return Ok(catalog);
        }
        for path in json_files(dir)? {
            let Ok(artifact) = serde_json::from_str::<Artifact>(&fs::read_to_string(&path)?)
            else {
                continue;
            };
            let name = if artifact.contract_name.is_empty() {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            } else {
                artifact.contract_name.clone()
            };
            debug!("Loaded artifact {name} from {}", path.display());
            catalog.insert(name, artifact);
        }
        Ok(catalog)
    }

    pub fn insert(&mut self, name: impl Into<String>, artifact: Artifact) {
        self.artifacts.insert(name.into(), artifact);
    }

    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    fn artifact(&self, name: &str) -> Result<&Artifact, CodecError> {
        self.get(name)
            .ok_or_else(|| CodecError::UnknownContract(name.to_string()))
    }

    fn encode_deploy(&self, contract: &str, args: &[Value]) -> Result<Bytes, CodecError> {
        let artifact = self.artifact(contract)?;
        let mut code = artifact.bytecode.to_vec();
        match &artifact.abi.constructor {
            Some(constructor) => {
                let values = coerce_all(&constructor.inputs, args)?;
                let encoded = constructor
                    .abi_encode_input(&values)
                    .map_err(|e| invalid(0, e))?;
                code.extend_from_slice(&encoded);
            }
            None if !args.is_empty() => {
                return Err(CodecError::ArgumentCount {
                    expected: 0,
                    got: args.len(),
                })
            }
            None => {}
        }
        Ok(code.into())
    }

    fn encode_invoke(
        &self,
        contract: Option<&str>,
        method: &str,
        args: &[Value],
    ) -> Result<Bytes, CodecError> {
        let candidates: Vec<(&str, &Artifact)> = match contract {
            Some(name) => vec![(name, self.artifact(name)?)],
            // Literal target without an artifact name: first artifact exposing the method
            None => self
                .artifacts
                .iter()
                .map(|(name, artifact)| (name.as_str(), artifact))
                .collect(),
        };
        let function = candidates
            .iter()
            .find_map(|(_, artifact)| {
                artifact
                    .abi
                    .function(method)?
                    .iter()
                    .find(|f| f.inputs.len() == args.len())
            })
            .ok_or_else(|| CodecError::UnknownMethod {
                contract: contract.unwrap_or("*").to_string(),
                method: method.to_string(),
                arity: args.len(),
            })?;
        let values = coerce_all(&function.inputs, args)?;
        let encoded = function
            .abi_encode_input(&values)
            .map_err(|e| invalid(0, e))?;
        Ok(encoded.into())
    }
}

impl ContractCodec for ArtifactCatalog {
    fn encode(&self, action: &ResolvedAction) -> Result<EncodedAction, CodecError> {
        match &action.call {
            ResolvedCall::Deploy { contract } => Ok(EncodedAction {
                from: action.sender,
                to: None,
                input: self.encode_deploy(contract, &action.args)?,
            }),
            ResolvedCall::Invoke {
                target,
                contract,
                method,
            } => Ok(EncodedAction {
                from: action.sender,
                to: Some(*target),
                input: self.encode_invoke(contract.as_deref(), method, &action.args)?,
            }),
        }
    }
}

fn invalid(index: usize, reason: impl ToString) -> CodecError {
    CodecError::InvalidArgument {
        index,
        reason: reason.to_string(),
    }
}

fn coerce_all(params: &[Param], args: &[Value]) -> Result<Vec<DynSolValue>, CodecError> {
    if params.len() != args.len() {
        return Err(CodecError::ArgumentCount {
            expected: params.len(),
            got: args.len(),
        });
    }
    params
        .iter()
        .zip(args)
        .enumerate()
        .map(|(index, (param, arg))| {
            let ty: DynSolType = param.resolve().map_err(|e| invalid(index, e))?;
            coerce(&ty, arg).map_err(|e| invalid(index, e))
        })
        .collect()
}

/// Convert one argument to the ABI type the contract expects
fn coerce(ty: &DynSolType, value: &Value) -> Result<DynSolValue, String> {
    match (ty, value) {
        (DynSolType::Address, Value::Address(address)) => Ok(DynSolValue::Address(*address)),
        (DynSolType::FixedBytes(32), Value::Hash(hash)) => Ok(DynSolValue::FixedBytes(*hash, 32)),
        (DynSolType::Bytes, Value::Bytes(bytes)) => Ok(DynSolValue::Bytes(bytes.to_vec())),
        // Return data of another call: decode it as the expected type
        (_, Value::Bytes(bytes)) => ty.abi_decode(bytes).map_err(|e| e.to_string()),
        (_, Value::Address(address)) => ty
            .coerce_str(&address.to_string())
            .map_err(|e| e.to_string()),
        (_, Value::Hash(hash)) => ty.coerce_str(&hash.to_string()).map_err(|e| e.to_string()),
        (_, Value::Literal(literal)) => {
            ty.coerce_str(&literal_to_str(literal)).map_err(|e| e.to_string())
        }
    }
}

/// Flatten a declared literal into the textual form `DynSolType::coerce_str` parses
fn literal_to_str(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => U256::ZERO.to_string(),
        serde_json::Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(literal_to_str).collect();
            format!("[{}]", inner.join(","))
        }
        serde_json::Value::Object(fields) => {
            let inner: Vec<String> = fields.values().map(literal_to_str).collect();
            format!("({})", inner.join(","))
        }
    }
}

fn json_files(dir: &Path) -> Result<Vec<PathBuf>, CodecError> {
    let mut files = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in fs::read_dir(&current)? {
            let path = entry?.path();
            if path.is_dir() {
                stack.push(path);
            } else if path
                .extension()
                .is_some_and(|ext| ext == "json")
                && !path.to_string_lossy().ends_with(".dbg.json")
            {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
