use alloy_dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier};
use alloy_json_abi::{Function, JsonAbi};
use alloy_primitives::Bytes;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("invalid ABI: {0}")]
    InvalidAbi(String),
    #[error("function {0} not found in ABI")]
    UnknownFunction(String),
    #[error("function {name} takes {expected} arguments, got {got}")]
    ArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("argument {index}: {reason}")]
    InvalidArgument { index: usize, reason: String },
    #[error("encoding failed: {0}")]
    Encoding(String),
}

/// Parses a JSON ABI: either a bare array or a build artifact carrying an `abi` field.
pub fn parse_abi(json: &str) -> Result<JsonAbi, EncodeError> {
    let mut value: Value =
        serde_json::from_str(json).map_err(|e| EncodeError::InvalidAbi(e.to_string()))?;
    if let Some(abi) = value.get_mut("abi") {
        value = abi.take();
    }
    serde_json::from_value(value).map_err(|e| EncodeError::InvalidAbi(e.to_string()))
}

/// Encodes a call to `function_name` with `inputs`, prefixed with the function selector.
///
/// Overloads are resolved by argument count. Inputs may be JSON strings (addresses, hex bytes,
/// decimal or hex numbers), numbers, booleans or nested arrays for array and tuple parameters.
pub fn encode_with_selector(
    abi: &JsonAbi,
    function_name: &str,
    inputs: &[Value],
) -> Result<Bytes, EncodeError> {
    let function = select_overload(abi, function_name, inputs.len())?;
    let mut values = Vec::with_capacity(inputs.len());
    for (index, (param, input)) in function.inputs.iter().zip(inputs).enumerate() {
        let ty = param.resolve().map_err(|e| EncodeError::InvalidArgument {
            index,
            reason: e.to_string(),
        })?;
        let value =
            coerce(&ty, input).map_err(|reason| EncodeError::InvalidArgument { index, reason })?;
        values.push(value);
    }
    let data = function
        .abi_encode_input(&values)
        .map_err(|e| EncodeError::Encoding(e.to_string()))?;
    Ok(data.into())
}

/// [`encode_with_selector`] over raw JSON text, as passed on a command line.
pub fn encode_with_selector_json(
    abi_json: &str,
    function_name: &str,
    inputs_json: &str,
) -> Result<Bytes, EncodeError> {
    let abi = parse_abi(abi_json)?;
    let inputs: Vec<Value> =
        serde_json::from_str(inputs_json).map_err(|e| EncodeError::InvalidArgument {
            index: 0,
            reason: format!("inputs must be a JSON array: {e}"),
        })?;
    encode_with_selector(&abi, function_name, &inputs)
}

fn select_overload<'a>(
    abi: &'a JsonAbi,
    name: &str,
    arity: usize,
) -> Result<&'a Function, EncodeError> {
    let overloads = abi
        .function(name)
        .filter(|overloads| !overloads.is_empty())
        .ok_or_else(|| EncodeError::UnknownFunction(name.to_string()))?;
    overloads
        .iter()
        .find(|f| f.inputs.len() == arity)
        .ok_or_else(|| EncodeError::ArgumentCount {
            name: name.to_string(),
            expected: overloads[0].inputs.len(),
            got: arity,
        })
}

fn coerce(ty: &DynSolType, input: &Value) -> Result<DynSolValue, String> {
    match input {
        Value::String(s) => ty.coerce_str(s).map_err(|e| e.to_string()),
        Value::Number(n) => ty.coerce_str(&n.to_string()).map_err(|e| e.to_string()),
        Value::Bool(b) => ty.coerce_str(&b.to_string()).map_err(|e| e.to_string()),
        Value::Array(items) => coerce_sequence(ty, items),
        Value::Null | Value::Object(_) => {
            Err(format!("cannot coerce {input} to {}", ty.sol_type_name()))
        }
    }
}

fn coerce_sequence(ty: &DynSolType, items: &[Value]) -> Result<DynSolValue, String> {
    match ty {
        DynSolType::Array(inner) => {
            let values = items.iter().map(|item| coerce(inner, item)).collect::<Result<_, _>>()?;
            Ok(DynSolValue::Array(values))
        }
        DynSolType::FixedArray(inner, len) => {
            if items.len() != *len {
                return Err(format!("expected {len} elements, got {}", items.len()));
            }
            let values = items.iter().map(|item| coerce(inner, item)).collect::<Result<_, _>>()?;
            Ok(DynSolValue::FixedArray(values))
        }
        DynSolType::Tuple(types) => {
            if items.len() != types.len() {
                return Err(format!("expected {} tuple fields, got {}", types.len(), items.len()));
            }
            let values = types
                .iter()
                .zip(items)
                .map(|(ty, item)| coerce(ty, item))
                .collect::<Result<_, _>>()?;
            Ok(DynSolValue::Tuple(values))
        }
        _ => Err(format!("cannot coerce an array to {}", ty.sol_type_name())),
    }
}
