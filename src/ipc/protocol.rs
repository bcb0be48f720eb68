// Copyright (c) 2023 Mike Tsao. All rights reserved.

//! Wire framing for the control socket. Integers are varints (7-bit
//! payload, MSB as continuation); a string is a varint byte length plus
//! UTF-8 bytes; a message is a varint string count plus that many strings;
//! a response is a varint success flag (1 or 0) plus one string.

use std::io::{Read, Write};
use thiserror::Error;

/// Refuse absurd frames instead of allocating for them.
const MAX_STRING_BYTES: u64 = 1 << 20;
const MAX_MESSAGE_STRINGS: u64 = 1 << 10;

#[derive(Debug, Error)]
pub enum IpcError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("connection closed unexpectedly while reading")]
    UnexpectedEof,
    #[error("frame too large: {0}")]
    FrameTooLarge(u64),
    #[error("varint too long")]
    VarIntTooLong,
    #[error("frame is not valid UTF-8")]
    InvalidUtf8,
}

pub fn write_varint(writer: &mut impl Write, mut value: u64) -> Result<(), IpcError> {
    loop {
        let low_seven = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            writer.write_all(&[low_seven])?;
            return Ok(());
        }
        writer.write_all(&[low_seven | 0x80])?;
    }
}

pub fn read_varint(reader: &mut impl Read) -> Result<u64, IpcError> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = read_byte(reader)?;
        if shift >= 63 && byte > 1 {
            return Err(IpcError::VarIntTooLong);
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 63 {
            return Err(IpcError::VarIntTooLong);
        }
    }
}

pub fn write_string(writer: &mut impl Write, text: &str) -> Result<(), IpcError> {
    write_varint(writer, text.len() as u64)?;
    writer.write_all(text.as_bytes())?;
    Ok(())
}

pub fn read_string(reader: &mut impl Read) -> Result<String, IpcError> {
    let length = read_varint(reader)?;
    if length > MAX_STRING_BYTES {
        return Err(IpcError::FrameTooLarge(length));
    }
    let mut bytes = vec![0u8; length as usize];
    read_exact(reader, &mut bytes)?;
    String::from_utf8(bytes).map_err(|_| IpcError::InvalidUtf8)
}

pub fn write_message(writer: &mut impl Write, message: &[String]) -> Result<(), IpcError> {
    write_varint(writer, message.len() as u64)?;
    for text in message {
        write_string(writer, text)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn read_message(reader: &mut impl Read) -> Result<Vec<String>, IpcError> {
    let count = read_varint(reader)?;
    if count > MAX_MESSAGE_STRINGS {
        return Err(IpcError::FrameTooLarge(count));
    }
    (0..count).map(|_| read_string(reader)).collect()
}

pub fn write_response(
    writer: &mut impl Write,
    (success, text): (bool, String),
) -> Result<(), IpcError> {
    write_varint(writer, u64::from(success))?;
    write_string(writer, &text)?;
    writer.flush()?;
    Ok(())
}

pub fn read_response(reader: &mut impl Read) -> Result<(bool, String), IpcError> {
    let success = read_varint(reader)? != 0;
    let text = read_string(reader)?;
    Ok((success, text))
}

fn read_byte(reader: &mut impl Read) -> Result<u8, IpcError> {
    let mut byte = [0u8; 1];
    read_exact(reader, &mut byte)?;
    Ok(byte[0])
}

fn read_exact(reader: &mut impl Read, buffer: &mut [u8]) -> Result<(), IpcError> {
    reader.read_exact(buffer).map_err(|err| {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            IpcError::UnexpectedEof
        } else {
            IpcError::Io(err)
        }
    })
}
