#![forbid(unsafe_code)]

//! Order-preserving byte encoding of tuples.
//!
//! `encode_tuple(a).cmp(&encode_tuple(b)) == compare_tuple(a, b)` for every pair of
//! tuples, so sorted maps and SQL indexes can order keys with a plain byte compare.

use crate::value::{KeyPart, Value};

const TAG_MIN: u8 = 0x00;
const TAG_NULL: u8 = 0x01;
const TAG_INTEGER: u8 = 0x02;
const TAG_FLOAT: u8 = 0x03;
const TAG_TEXT: u8 = 0x04;
const TAG_MAX: u8 = 0xff;

const SIGN_BIT: u64 = 1 << 63;

pub fn encode_tuple(tuple: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(tuple.len() * 10);
    for value in tuple {
        encode_value(value, &mut out);
    }
    out
}

pub fn encode_key_parts(parts: &[KeyPart]) -> Vec<u8> {
    let mut out = Vec::with_capacity(parts.len() * 10);
    for part in parts {
        match part {
            KeyPart::Min => out.push(TAG_MIN),
            KeyPart::Max => out.push(TAG_MAX),
            KeyPart::Value(value) => encode_value(value, &mut out),
        }
    }
    out
}

fn encode_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(_) | Value::Integer(_) => {
            out.push(TAG_INTEGER);
            out.extend_from_slice(&((value.integral() as u64) ^ SIGN_BIT).to_be_bytes());
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            let bits = f.to_bits();
            let ordered = if bits & SIGN_BIT != 0 {
                !bits
            } else {
                bits ^ SIGN_BIT
            };
            out.extend_from_slice(&ordered.to_be_bytes());
        }
        Value::Text(text) => {
            out.push(TAG_TEXT);
            for &byte in text.as_bytes() {
                out.push(byte);
                if byte == 0x00 {
                    out.push(0xff);
                }
            }
            // 0x00 0x01 sorts below any escaped NUL (0x00 0xff) and any other byte.
            out.extend_from_slice(&[0x00, 0x01]);
        }
    }
}
