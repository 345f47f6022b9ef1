//! Constructor and call arguments, and their ABI encoding.
//!
//! Plans describe arguments loosely ([`ArgSpec`]). Constructor arguments are
//! typed by their shape into [`Arg`] values; call arguments are read as the
//! types their function signature declares.

use alloy_core::{
    dyn_abi::{DynSolType, DynSolValue, Specifier},
    json_abi::Function,
    primitives::{Address, B256, Bytes, U256},
};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Prefix marking a reference to another contract of the plan.
pub const CONTRACT_REF_PREFIX: char = '@';

/// An argument as written in a plan file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgSpec {
    Bool(bool),
    Int(u64),
    Text(String),
    List(Vec<ArgSpec>),
}

impl ArgSpec {
    /// Contract ids referenced by this argument, in order.
    pub fn references(&self) -> Vec<&str> {
        match self {
            ArgSpec::Text(s) => s
                .strip_prefix(CONTRACT_REF_PREFIX)
                .map(|id| vec![id])
                .unwrap_or_default(),
            ArgSpec::List(items) => items.iter().flat_map(|a| a.references()).collect(),
            ArgSpec::Bool(_) | ArgSpec::Int(_) => vec![],
        }
    }

    /// Resolve into a typed argument. `lookup` maps contract ids to addresses.
    pub fn resolve<F>(&self, lookup: &F) -> Result<Arg>
    where
        F: Fn(&str) -> Option<Address>,
    {
        Ok(match self {
            ArgSpec::Bool(b) => Arg::Bool(*b),
            ArgSpec::Int(n) => Arg::Uint(U256::from(*n)),
            ArgSpec::List(items) => Arg::Array(
                items
                    .iter()
                    .map(|a| a.resolve(lookup))
                    .collect::<Result<_>>()?,
            ),
            ArgSpec::Text(s) => {
                if let Some(id) = s.strip_prefix(CONTRACT_REF_PREFIX) {
                    Arg::Address(
                        lookup(id)
                            .with_context(|| format!("Contract '{id}' has no address yet"))?,
                    )
                } else if is_hex_of_len(s, 20) {
                    Arg::Address(s.parse().with_context(|| format!("Invalid address: {s}"))?)
                } else if is_hex_of_len(s, 32) {
                    Arg::Bytes32(s.parse().with_context(|| format!("Invalid bytes32: {s}"))?)
                } else {
                    Arg::String(s.clone())
                }
            }
        })
    }
}

impl ArgSpec {
    /// Resolve into a value of the declared parameter type `ty`.
    pub fn resolve_as<F>(&self, ty: &DynSolType, lookup: &F) -> Result<DynSolValue>
    where
        F: Fn(&str) -> Option<Address>,
    {
        let type_name = ty.sol_type_name();
        match (self, ty) {
            (ArgSpec::Text(s), _) if s.starts_with(CONTRACT_REF_PREFIX) => {
                if !matches!(ty, DynSolType::Address) {
                    anyhow::bail!("Contract reference '{s}' cannot be passed as {type_name}");
                }
                let id = &s[CONTRACT_REF_PREFIX.len_utf8()..];
                let address = lookup(id).with_context(|| format!("Contract '{id}' has no address yet"))?;
                Ok(DynSolValue::Address(address))
            }
            (ArgSpec::Text(s), _) => ty
                .coerce_str(s)
                .with_context(|| format!("'{s}' is not a valid {type_name}")),
            (ArgSpec::Int(n), _) => ty
                .coerce_str(&n.to_string())
                .with_context(|| format!("{n} is not a valid {type_name}")),
            (ArgSpec::Bool(b), _) => ty
                .coerce_str(if *b { "true" } else { "false" })
                .with_context(|| format!("{b} is not a valid {type_name}")),
            (ArgSpec::List(items), DynSolType::Array(inner)) => Ok(DynSolValue::Array(
                items
                    .iter()
                    .map(|a| a.resolve_as(inner, lookup))
                    .collect::<Result<_>>()?,
            )),
            (ArgSpec::List(items), DynSolType::FixedArray(inner, len)) => {
                if items.len() != *len {
                    anyhow::bail!("{type_name} takes {len} item(s), got {}", items.len());
                }
                Ok(DynSolValue::FixedArray(
                    items
                        .iter()
                        .map(|a| a.resolve_as(inner, lookup))
                        .collect::<Result<_>>()?,
                ))
            }
            (ArgSpec::List(items), DynSolType::Tuple(types)) => {
                if items.len() != types.len() {
                    anyhow::bail!("{type_name} takes {} field(s), got {}", types.len(), items.len());
                }
                Ok(DynSolValue::Tuple(
                    items
                        .iter()
                        .zip(types)
                        .map(|(a, t)| a.resolve_as(t, lookup))
                        .collect::<Result<_>>()?,
                ))
            }
            (ArgSpec::List(_), _) => anyhow::bail!("A list cannot be passed as {type_name}"),
        }
    }
}

fn is_hex_of_len(s: &str, bytes: usize) -> bool {
    s.strip_prefix("0x")
        .is_some_and(|h| h.len() == bytes * 2 && h.chars().all(|c| c.is_ascii_hexdigit()))
}

/// A resolved, typed argument.
///
/// Serializes to the JSON shape kept in deployment records: addresses as
/// checksummed strings, arrays as JSON arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Arg {
    Address(Address),
    Bytes32(B256),
    Uint(U256),
    Bool(bool),
    String(String),
    Array(Vec<Arg>),
}

impl From<&Arg> for DynSolValue {
    fn from(arg: &Arg) -> Self {
        match arg {
            Arg::Address(a) => DynSolValue::Address(*a),
            Arg::Bytes32(b) => DynSolValue::FixedBytes(*b, 32),
            Arg::Uint(u) => DynSolValue::Uint(*u, 256),
            Arg::Bool(b) => DynSolValue::Bool(*b),
            Arg::String(s) => DynSolValue::String(s.clone()),
            Arg::Array(items) => DynSolValue::Array(items.iter().map(Into::into).collect()),
        }
    }
}

/// ABI-encode `args` as a parameter list.
pub fn encode_params(args: &[Arg]) -> Vec<u8> {
    if args.is_empty() {
        return Vec::new();
    }
    DynSolValue::Tuple(args.iter().map(Into::into).collect()).abi_encode_params()
}

/// Creation code: contract bytecode followed by the encoded constructor arguments.
pub fn creation_code(bytecode: &Bytes, args: &[Arg]) -> Bytes {
    let mut code = bytecode.to_vec();
    code.extend(encode_params(args));
    code.into()
}

/// Parse a function signature such as `setBaseURI(string)`.
pub fn parse_function(signature: &str) -> Result<Function> {
    Function::parse(signature).with_context(|| format!("Invalid function signature: {signature}"))
}

/// 4-byte selector of `signature`, computed from its canonical form.
pub fn selector(signature: &str) -> Result<[u8; 4]> {
    Ok(parse_function(signature)?.selector().0)
}

/// Coerce `args` to the parameter types declared by `function`.
fn typed_args<F>(function: &Function, args: &[ArgSpec], lookup: &F) -> Result<Vec<DynSolValue>>
where
    F: Fn(&str) -> Option<Address>,
{
    if function.inputs.len() != args.len() {
        anyhow::bail!(
            "{} expects {} argument(s), got {}",
            function.signature(),
            function.inputs.len(),
            args.len()
        );
    }

    function
        .inputs
        .iter()
        .zip(args)
        .enumerate()
        .map(|(i, (param, arg))| {
            let ty = param
                .resolve()
                .with_context(|| format!("Unsupported parameter type {}", param.ty))?;
            arg.resolve_as(&ty, lookup)
                .with_context(|| format!("Argument {} of {}", i + 1, function.signature()))
        })
        .collect()
}

/// Calldata for `signature` applied to `args`.
///
/// Every argument is read as the type the signature declares for it, so an
/// address-shaped string passed to a `string` parameter stays a string.
pub fn encode_call<F>(signature: &str, args: &[ArgSpec], lookup: &F) -> Result<Bytes>
where
    F: Fn(&str) -> Option<Address>,
{
    let function = parse_function(signature)?;
    let values = typed_args(&function, args, lookup)?;

    let mut data = function.selector().to_vec();
    if !values.is_empty() {
        data.extend(DynSolValue::Tuple(values).abi_encode_params());
    }
    Ok(data.into())
}

/// Check that `args` fit `signature`, without resolving contract references.
pub fn check_call(signature: &str, args: &[ArgSpec]) -> Result<()> {
    let function = parse_function(signature)?;
    typed_args(&function, args, &|_: &str| Some(Address::ZERO)).map(|_| ())
}
