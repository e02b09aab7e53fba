//! ABI-typed value generation, mutation and JSON encoding.
//!
//! The JSON forms here are part of the stable corpus and configuration
//! interface: integers of any width appear as decimal strings, addresses as
//! 0x-prefixed hex, `bytes`/`bytesN` as hex without a prefix, tuples as
//! objects keyed by the ABI component name, and arrays as JSON arrays.

use super::ValueGenerator;
use alloy_dyn_abi::{DynSolType, DynSolValue};
use alloy_json_abi::Param;
use alloy_primitives::{hex, Address, Sign, B256, I256, U256};
use rand::Rng;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// String prefix which, followed by a contract name, resolves to the address
/// of the already-deployed contract of that name at deployment time.
pub const DEPLOYED_CONTRACT_PREFIX: &str = "DeployedContract:";

/// Errors raised while encoding, decoding or generating ABI values.
#[derive(Debug, thiserror::Error)]
pub enum EncodingError {
    /// The ABI declares a type this fuzzer does not know.
    #[error("unknown ABI type: {0}")]
    UnknownType(String),
    /// The ABI type is known but unsupported for fuzzing.
    #[error("unsupported ABI type: {0}")]
    UnsupportedType(String),
    /// A value did not match the ABI type it was paired with.
    #[error("ABI type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    /// A JSON value could not be interpreted as the ABI type.
    #[error("invalid {ty} value: {msg}")]
    InvalidValue { ty: String, msg: String },
    /// A method signature could not be resolved against a contract ABI.
    #[error("method {0} not found in contract ABI")]
    UnknownMethod(String),
    /// A `DeployedContract:` reference named an unknown contract.
    #[error("contract {0} not found in deployed contracts")]
    UnknownContract(String),
    /// The underlying ABI encoder rejected the value.
    #[error(transparent)]
    Abi(#[from] alloy_dyn_abi::Error),
}

impl EncodingError {
    fn invalid(ty: impl Into<String>, msg: impl std::fmt::Display) -> Self {
        Self::InvalidValue { ty: ty.into(), msg: msg.to_string() }
    }

    fn mismatch(expected: impl std::fmt::Display, actual: &DynSolValue) -> Self {
        Self::TypeMismatch {
            expected: expected.to_string(),
            actual: actual
                .as_type()
                .map_or_else(|| "<unknown>".into(), |t| t.sol_type_name().into_owned()),
        }
    }
}

/// Generates a value of the provided ABI type using the provided generator.
pub fn generate_abi_value(
    generator: &mut dyn ValueGenerator,
    ty: &DynSolType,
) -> Result<DynSolValue, EncodingError> {
    match ty {
        DynSolType::Address => Ok(DynSolValue::Address(generator.generate_address())),
        DynSolType::Bool => Ok(DynSolValue::Bool(generator.generate_bool())),
        DynSolType::Uint(bits) => Ok(DynSolValue::Uint(generator.generate_uint(*bits), *bits)),
        DynSolType::Int(bits) => Ok(DynSolValue::Int(generator.generate_int(*bits), *bits)),
        DynSolType::FixedBytes(size) => Ok(DynSolValue::FixedBytes(
            B256::right_padding_from(&generator.generate_fixed_bytes(*size)),
            *size,
        )),
        DynSolType::Bytes => Ok(DynSolValue::Bytes(generator.generate_bytes())),
        DynSolType::String => Ok(DynSolValue::String(generator.generate_string())),
        DynSolType::Array(inner) => {
            let length = generator.generate_array_length();
            (0..length)
                .map(|_| generate_abi_value(generator, inner))
                .collect::<Result<Vec<_>, _>>()
                .map(DynSolValue::Array)
        }
        DynSolType::FixedArray(inner, size) => (0..*size)
            .map(|_| generate_abi_value(generator, inner))
            .collect::<Result<Vec<_>, _>>()
            .map(DynSolValue::FixedArray),
        DynSolType::Tuple(fields) => fields
            .iter()
            .map(|field| generate_abi_value(generator, field))
            .collect::<Result<Vec<_>, _>>()
            .map(DynSolValue::Tuple),
        _ => Err(EncodingError::UnsupportedType(ty.sol_type_name().into_owned())),
    }
}

/// Mutates an existing value of the provided ABI type. Values that do not
/// match the type are regenerated from scratch.
pub fn mutate_abi_value(
    generator: &mut dyn ValueGenerator,
    ty: &DynSolType,
    value: DynSolValue,
) -> Result<DynSolValue, EncodingError> {
    match (ty, value) {
        (DynSolType::Bool, DynSolValue::Bool(v)) => Ok(DynSolValue::Bool(generator.mutate_bool(v))),
        (DynSolType::Address, DynSolValue::Address(v)) => {
            Ok(DynSolValue::Address(generator.mutate_address(v)))
        }
        (DynSolType::Uint(bits), DynSolValue::Uint(v, _)) => {
            Ok(DynSolValue::Uint(generator.mutate_uint(v, *bits), *bits))
        }
        (DynSolType::Int(bits), DynSolValue::Int(v, _)) => {
            Ok(DynSolValue::Int(generator.mutate_int(v, *bits), *bits))
        }
        (DynSolType::FixedBytes(size), DynSolValue::FixedBytes(word, _)) => {
            let mutated = generator.mutate_fixed_bytes(word[..*size].to_vec());
            Ok(DynSolValue::FixedBytes(B256::right_padding_from(&mutated), *size))
        }
        (DynSolType::Bytes, DynSolValue::Bytes(v)) => {
            Ok(DynSolValue::Bytes(generator.mutate_bytes(v)))
        }
        (DynSolType::String, DynSolValue::String(v)) => {
            Ok(DynSolValue::String(generator.mutate_string(v)))
        }
        (DynSolType::Array(inner), DynSolValue::Array(mut values)) => {
            match generator.rng().random_range(0..3u32) {
                // Shrink the array by one element.
                0 if !values.is_empty() => {
                    let i = generator.rng().random_range(0..values.len());
                    values.remove(i);
                }
                // Grow the array by one element.
                1 => values.push(generate_abi_value(generator, inner)?),
                // Mutate a random element.
                _ if !values.is_empty() => {
                    let i = generator.rng().random_range(0..values.len());
                    let old = std::mem::replace(&mut values[i], DynSolValue::Bool(false));
                    values[i] = mutate_abi_value(generator, inner, old)?;
                }
                _ => values.push(generate_abi_value(generator, inner)?),
            }
            Ok(DynSolValue::Array(values))
        }
        (DynSolType::FixedArray(inner, _), DynSolValue::FixedArray(mut values))
            if !values.is_empty() =>
        {
            let i = generator.rng().random_range(0..values.len());
            let old = std::mem::replace(&mut values[i], DynSolValue::Bool(false));
            values[i] = mutate_abi_value(generator, inner, old)?;
            Ok(DynSolValue::FixedArray(values))
        }
        (DynSolType::Tuple(fields), DynSolValue::Tuple(mut values))
            if !values.is_empty() && fields.len() == values.len() =>
        {
            let i = generator.rng().random_range(0..values.len());
            let old = std::mem::replace(&mut values[i], DynSolValue::Bool(false));
            values[i] = mutate_abi_value(generator, &fields[i], old)?;
            Ok(DynSolValue::Tuple(values))
        }
        (ty, _) => generate_abi_value(generator, ty),
    }
}

/// Applies one contractive mutation to a value: scalars shrink through the
/// generator's `mutate_*` methods, composites either drop an element or
/// recurse.
pub fn shrink_abi_value(
    generator: &mut dyn ValueGenerator,
    ty: &DynSolType,
    value: DynSolValue,
) -> Result<DynSolValue, EncodingError> {
    match (ty, value) {
        (DynSolType::Array(inner), DynSolValue::Array(mut values)) => {
            if values.is_empty() {
                return Ok(DynSolValue::Array(values));
            }
            let i = generator.rng().random_range(0..values.len());
            if generator.rng().random() {
                values.remove(i);
            } else {
                let old = std::mem::replace(&mut values[i], DynSolValue::Bool(false));
                values[i] = shrink_abi_value(generator, inner, old)?;
            }
            Ok(DynSolValue::Array(values))
        }
        (DynSolType::FixedArray(inner, _), DynSolValue::FixedArray(mut values))
            if !values.is_empty() =>
        {
            let i = generator.rng().random_range(0..values.len());
            let old = std::mem::replace(&mut values[i], DynSolValue::Bool(false));
            values[i] = shrink_abi_value(generator, inner, old)?;
            Ok(DynSolValue::FixedArray(values))
        }
        (DynSolType::Tuple(fields), DynSolValue::Tuple(mut values))
            if !values.is_empty() && fields.len() == values.len() =>
        {
            let i = generator.rng().random_range(0..values.len());
            let old = std::mem::replace(&mut values[i], DynSolValue::Bool(false));
            values[i] = shrink_abi_value(generator, &fields[i], old)?;
            Ok(DynSolValue::Tuple(values))
        }
        (ty, value) => mutate_abi_value(generator, ty, value),
    }
}

/// Encodes typed argument values into generic JSON, paired with their ABI
/// parameter declarations.
pub fn encode_json_arguments(
    params: &[Param],
    values: &[DynSolValue],
) -> Result<Vec<JsonValue>, EncodingError> {
    if params.len() != values.len() {
        return Err(EncodingError::invalid(
            "arguments",
            format_args!("argument count mismatch, expected {} but got {}", params.len(), values.len()),
        ));
    }
    params.iter().zip(values).map(|(param, value)| encode_json_argument(param, value)).collect()
}

/// Decodes generic JSON argument values into typed values, paired with their
/// ABI parameter declarations.
pub fn decode_json_arguments(
    params: &[Param],
    values: &[JsonValue],
    deployed: Option<&BTreeMap<String, Address>>,
) -> Result<Vec<DynSolValue>, EncodingError> {
    if params.len() != values.len() {
        return Err(EncodingError::invalid(
            "arguments",
            format_args!("argument count mismatch, expected {} but got {}", params.len(), values.len()),
        ));
    }
    params
        .iter()
        .zip(values)
        .map(|(param, value)| decode_json_argument(param, value, deployed))
        .collect()
}

/// Decodes JSON argument values keyed by parameter name, as used for
/// constructor arguments in the project configuration.
pub fn decode_json_arguments_map(
    params: &[Param],
    values: &BTreeMap<String, JsonValue>,
    deployed: Option<&BTreeMap<String, Address>>,
) -> Result<Vec<DynSolValue>, EncodingError> {
    params
        .iter()
        .map(|param| {
            let value = values.get(&param.name).ok_or_else(|| {
                EncodingError::invalid(&param.ty, format_args!("argument not provided for: {}", param.name))
            })?;
            decode_json_argument(param, value, deployed)
        })
        .collect()
}

/// Encodes one typed value into its generic JSON form.
pub fn encode_json_argument(
    param: &Param,
    value: &DynSolValue,
) -> Result<JsonValue, EncodingError> {
    if let Some((element, _)) = split_array_suffix(&param.ty) {
        let element = element_param(param, element);
        let values = match value {
            DynSolValue::Array(values) | DynSolValue::FixedArray(values) => values,
            other => return Err(EncodingError::mismatch(&param.ty, other)),
        };
        return values
            .iter()
            .map(|value| encode_json_argument(&element, value))
            .collect::<Result<Vec<_>, _>>()
            .map(JsonValue::Array);
    }

    if param.ty == "tuple" {
        let DynSolValue::Tuple(values) = value else {
            return Err(EncodingError::mismatch("tuple", value));
        };
        if values.len() != param.components.len() {
            return Err(EncodingError::invalid("tuple", "component count mismatch"));
        }
        let mut object = serde_json::Map::new();
        for (component, value) in param.components.iter().zip(values) {
            object.insert(component.name.clone(), encode_json_argument(component, value)?);
        }
        return Ok(JsonValue::Object(object));
    }

    let ty = parse_scalar_type(&param.ty)?;
    match (&ty, value) {
        (DynSolType::Address, DynSolValue::Address(addr)) => Ok(JsonValue::String(addr.to_string())),
        (DynSolType::Uint(_), DynSolValue::Uint(v, _)) => Ok(JsonValue::String(v.to_string())),
        (DynSolType::Int(_), DynSolValue::Int(v, _)) => Ok(JsonValue::String(v.to_string())),
        (DynSolType::Bool, DynSolValue::Bool(v)) => Ok(JsonValue::Bool(*v)),
        (DynSolType::String, DynSolValue::String(v)) => Ok(JsonValue::String(v.clone())),
        (DynSolType::Bytes, DynSolValue::Bytes(v)) => Ok(JsonValue::String(hex::encode(v))),
        (DynSolType::FixedBytes(size), DynSolValue::FixedBytes(word, _)) => {
            Ok(JsonValue::String(hex::encode(&word[..*size])))
        }
        (_, value) => Err(EncodingError::mismatch(&param.ty, value)),
    }
}

/// Decodes one generic JSON value into a typed value.
///
/// When `deployed` is provided, address-typed string values carrying the
/// [`DEPLOYED_CONTRACT_PREFIX`] resolve to the named contract's address.
pub fn decode_json_argument(
    param: &Param,
    value: &JsonValue,
    deployed: Option<&BTreeMap<String, Address>>,
) -> Result<DynSolValue, EncodingError> {
    if let Some((element, length)) = split_array_suffix(&param.ty) {
        let element = element_param(param, element);
        let JsonValue::Array(values) = value else {
            return Err(EncodingError::invalid(&param.ty, "JSON array expected"));
        };
        if let Some(length) = length {
            if values.len() != length {
                return Err(EncodingError::invalid(
                    &param.ty,
                    format_args!("expected {length} elements, got {}", values.len()),
                ));
            }
        }
        let decoded = values
            .iter()
            .map(|value| decode_json_argument(&element, value, deployed))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(if length.is_some() {
            DynSolValue::FixedArray(decoded)
        } else {
            DynSolValue::Array(decoded)
        });
    }

    if param.ty == "tuple" {
        let JsonValue::Object(object) = value else {
            return Err(EncodingError::invalid("tuple", "JSON object expected"));
        };
        let fields = param
            .components
            .iter()
            .map(|component| {
                let value = object.get(&component.name).ok_or_else(|| {
                    EncodingError::invalid(
                        "tuple",
                        format_args!("value for field {} not provided", component.name),
                    )
                })?;
                decode_json_argument(component, value, deployed)
            })
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(DynSolValue::Tuple(fields));
    }

    let ty = parse_scalar_type(&param.ty)?;
    match &ty {
        DynSolType::Address => {
            let s = expect_string(value, "address")?;
            if let Some(name) = s.strip_prefix(DEPLOYED_CONTRACT_PREFIX) {
                let deployed =
                    deployed.ok_or_else(|| EncodingError::UnknownContract(name.to_string()))?;
                return deployed
                    .get(name)
                    .copied()
                    .map(DynSolValue::Address)
                    .ok_or_else(|| EncodingError::UnknownContract(name.to_string()));
            }
            decode_address(s).map(DynSolValue::Address)
        }
        DynSolType::Uint(bits) => {
            let s = expect_string(value, "uint")?;
            let parsed = parse_unsigned(s)?;
            if parsed > super::width_mask(*bits) {
                return Err(EncodingError::invalid(&param.ty, format_args!("{parsed} out of range")));
            }
            Ok(DynSolValue::Uint(parsed, *bits))
        }
        DynSolType::Int(bits) => {
            let s = expect_string(value, "int")?;
            let parsed = parse_signed(s)?;
            let (min, max) = super::int_bounds(*bits);
            if parsed < min || parsed > max {
                return Err(EncodingError::invalid(&param.ty, format_args!("{parsed} out of range")));
            }
            Ok(DynSolValue::Int(parsed, *bits))
        }
        DynSolType::Bool => match value {
            JsonValue::Bool(v) => Ok(DynSolValue::Bool(*v)),
            _ => Err(EncodingError::invalid("bool", "JSON boolean expected")),
        },
        DynSolType::String => Ok(DynSolValue::String(expect_string(value, "string")?.to_string())),
        DynSolType::Bytes => {
            let s = expect_string(value, "bytes")?;
            let bytes = hex::decode(strip_hex_prefix(s))
                .map_err(|e| EncodingError::invalid("bytes", e))?;
            Ok(DynSolValue::Bytes(bytes))
        }
        DynSolType::FixedBytes(size) => {
            let s = expect_string(value, "fixed bytes")?;
            let bytes = hex::decode(strip_hex_prefix(s))
                .map_err(|e| EncodingError::invalid(&param.ty, e))?;
            if bytes.len() != *size {
                return Err(EncodingError::invalid(
                    &param.ty,
                    format_args!("invalid number of bytes ({})", bytes.len()),
                ));
            }
            Ok(DynSolValue::FixedBytes(B256::right_padding_from(&bytes), *size))
        }
        _ => Err(EncodingError::UnsupportedType(param.ty.clone())),
    }
}

/// Splits a trailing array suffix off a canonical ABI type string. Returns
/// the element type and the fixed length, if any.
fn split_array_suffix(ty: &str) -> Option<(&str, Option<usize>)> {
    let stripped = ty.strip_suffix(']')?;
    let open = stripped.rfind('[')?;
    let (element, length) = stripped.split_at(open);
    let length = &length[1..];
    if length.is_empty() {
        Some((element, None))
    } else {
        length.parse().ok().map(|n| (element, Some(n)))
    }
}

/// Builds the parameter declaration of an array's element type, carrying the
/// tuple components through.
fn element_param(param: &Param, element_ty: &str) -> Param {
    Param {
        ty: element_ty.to_string(),
        name: param.name.clone(),
        components: param.components.clone(),
        internal_type: None,
    }
}

fn parse_scalar_type(ty: &str) -> Result<DynSolType, EncodingError> {
    ty.parse::<DynSolType>().map_err(|_| EncodingError::UnknownType(ty.to_string()))
}

fn expect_string<'a>(value: &'a JsonValue, ty: &str) -> Result<&'a str, EncodingError> {
    value
        .as_str()
        .ok_or_else(|| EncodingError::invalid(ty, "value should be specified as a string in JSON"))
}

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn decode_address(s: &str) -> Result<Address, EncodingError> {
    let stripped = strip_hex_prefix(s);
    if stripped.len() != Address::len_bytes() * 2 {
        return Err(EncodingError::invalid(
            "address",
            format_args!("invalid address length ({})", s.len()),
        ));
    }
    let bytes = hex::decode(stripped).map_err(|e| EncodingError::invalid("address", e))?;
    Ok(Address::from_slice(&bytes))
}

fn parse_unsigned(s: &str) -> Result<U256, EncodingError> {
    let result = if let Some(hex_digits) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        U256::from_str_radix(hex_digits, 16)
    } else {
        U256::from_str_radix(s, 10)
    };
    result.map_err(|e| EncodingError::invalid("uint", e))
}

fn parse_signed(s: &str) -> Result<I256, EncodingError> {
    let (sign, magnitude) = match s.strip_prefix('-') {
        Some(rest) => (Sign::Negative, rest),
        None => (Sign::Positive, s),
    };
    let magnitude = parse_unsigned(magnitude).map_err(|_| {
        EncodingError::invalid("int", format_args!("invalid integer value: {s}"))
    })?;
    I256::checked_from_sign_and_abs(sign, magnitude)
        .ok_or_else(|| EncodingError::invalid("int", format_args!("{s} out of range")))
}
