//! Protocol constants: command codes, error codes, update types, stop
//! reasons, and step types.
//!
//! The integer assignments are part of the wire contract with the device
//! and must never change.

use serde::{Deserialize, Serialize};

use crate::error::{DebugError, Result};

/// The 8-byte handshake token is this literal plus its NUL terminator.
pub const HANDSHAKE_MAGIC: &str = "bsdebug";

/// Default control-channel port on the device.
pub const DEFAULT_CONTROL_PORT: u16 = 8081;

/// Default bind/connect host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Header size for requests and responses: packet_length + request_id +
/// (command_code | error_code), all u32 LE.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Header size for updates: the response header plus update_type (u32 LE).
pub const UPDATE_HEADER_SIZE: usize = 16;

/// Flag bits for the variables request.
pub mod variable_request_flags {
    /// Request the children of the variable at the path rather than the
    /// variable itself.
    pub const GET_CHILD_KEYS: u8 = 0x01;
}

/// Command codes carried in request headers (u32 LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum Command {
    Stop = 1,
    Continue = 2,
    Threads = 3,
    StackTrace = 4,
    Variables = 5,
    Step = 6,
    ExitChannel = 7,
    // Breakpoint codes exist for wire compatibility; no operations are
    // built on them.
    AddBreakpoints = 8,
    ListBreakpoints = 9,
    RemoveBreakpoints = 10,
}

impl Command {
    pub fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            1 => Command::Stop,
            2 => Command::Continue,
            3 => Command::Threads,
            4 => Command::StackTrace,
            5 => Command::Variables,
            6 => Command::Step,
            7 => Command::ExitChannel,
            8 => Command::AddBreakpoints,
            9 => Command::ListBreakpoints,
            10 => Command::RemoveBreakpoints,
            other => return Err(DebugError::UnknownCommandCode(other)),
        })
    }

    #[inline]
    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Error codes carried in response and update headers (u32 LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    #[default]
    Ok = 0,
    OtherErr = 1,
    Undefined = 2,
    NotStopped = 3,
    CantContinue = 4,
    NotStoppedDuringStep = 5,
    ThreadDetached = 6,
    ExecutionTimeout = 7,
    InvalidArgs = 8,
}

impl ErrorCode {
    pub fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            0 => ErrorCode::Ok,
            1 => ErrorCode::OtherErr,
            2 => ErrorCode::Undefined,
            3 => ErrorCode::NotStopped,
            4 => ErrorCode::CantContinue,
            5 => ErrorCode::NotStoppedDuringStep,
            6 => ErrorCode::ThreadDetached,
            7 => ErrorCode::ExecutionTimeout,
            8 => ErrorCode::InvalidArgs,
            other => return Err(DebugError::Decode(format!("unknown error code {other}"))),
        })
    }

    #[inline]
    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Update types carried in update headers (u32 LE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum UpdateType {
    Undefined = 0,
    IoPortOpened = 1,
    AllThreadsStopped = 2,
    ThreadAttached = 3,
}

impl UpdateType {
    pub fn from_wire(value: u32) -> Result<Self> {
        Ok(match value {
            0 => UpdateType::Undefined,
            1 => UpdateType::IoPortOpened,
            2 => UpdateType::AllThreadsStopped,
            3 => UpdateType::ThreadAttached,
            other => return Err(DebugError::UnknownUpdateType(other)),
        })
    }

    #[inline]
    pub fn to_wire(self) -> u32 {
        self as u32
    }
}

/// Why a thread is (or is not) stopped (u8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StopReason {
    NotStopped = 0,
    Normal = 1,
    StopStatement = 2,
    Break = 3,
    RuntimeError = 4,
}

impl StopReason {
    pub fn from_wire(value: u8) -> Result<Self> {
        Ok(match value {
            0 => StopReason::NotStopped,
            1 => StopReason::Normal,
            2 => StopReason::StopStatement,
            3 => StopReason::Break,
            4 => StopReason::RuntimeError,
            other => return Err(DebugError::Decode(format!("unknown stop reason {other}"))),
        })
    }

    #[inline]
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}

/// Granularity of a step request (u8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StepType {
    Line = 1,
    Over = 2,
    Out = 3,
}

impl StepType {
    pub fn from_wire(value: u8) -> Result<Self> {
        Ok(match value {
            1 => StepType::Line,
            2 => StepType::Over,
            3 => StepType::Out,
            other => return Err(DebugError::Decode(format!("unknown step type {other}"))),
        })
    }

    #[inline]
    pub fn to_wire(self) -> u8 {
        self as u8
    }
}
