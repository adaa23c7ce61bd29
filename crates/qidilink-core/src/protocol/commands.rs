//! Protocol commands
//!
//! Defines the G-code style commands understood by the printer's network module.

use serde::{Deserialize, Serialize};

/// Protocol commands for printer communication
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Command {
    /// Report SD print progress ('M27')
    PrintingStatus,

    /// Begin writing a file to storage ('M28')
    BeginWrite,

    /// Finish writing a file to storage ('M29')
    EndWrite,

    /// List files on storage ('M20')
    ListFiles,

    /// Delete a file from storage ('M30')
    DeleteFile,

    /// Current head position ('M114')
    CurrentPosition,

    /// Firmware and machine identification ('M115')
    DeviceInfo,

    /// Endstop / machine status ('M119')
    MachineStatus,

    /// Bed information ('M4000')
    BedInfo,

    /// Axis step resolution and build volume ('M4001')
    StepParameters,

    /// Firmware version ('M4002')
    Firmware,

    /// Power the machine off ('M4003')
    PowerOff,

    /// Start printing a stored file ('M6030')
    Print,

    /// Extruder and bed temperatures ('M105')
    Temperature,

    /// Network module information ('M99999')
    WifiInfo,
}

impl Command {
    /// Every command, in catalog order
    pub const ALL: [Command; 15] = [
        Command::PrintingStatus,
        Command::BeginWrite,
        Command::EndWrite,
        Command::ListFiles,
        Command::DeleteFile,
        Command::CurrentPosition,
        Command::DeviceInfo,
        Command::MachineStatus,
        Command::BedInfo,
        Command::StepParameters,
        Command::Firmware,
        Command::PowerOff,
        Command::Print,
        Command::Temperature,
        Command::WifiInfo,
    ];

    /// Get the wire code for this command
    pub fn code(&self) -> &'static str {
        match self {
            Command::PrintingStatus => "M27",
            Command::BeginWrite => "M28",
            Command::EndWrite => "M29",
            Command::ListFiles => "M20",
            Command::DeleteFile => "M30",
            Command::CurrentPosition => "M114",
            Command::DeviceInfo => "M115",
            Command::MachineStatus => "M119",
            Command::BedInfo => "M4000",
            Command::StepParameters => "M4001",
            Command::Firmware => "M4002",
            Command::PowerOff => "M4003",
            Command::Print => "M6030",
            Command::Temperature => "M105",
            Command::WifiInfo => "M99999",
        }
    }

    /// Check if this command expects a response
    pub fn expects_response(&self) -> bool {
        // The printer drops off the network while shutting down
        !matches!(self, Command::PowerOff)
    }

    /// Build the line for a command taking a file name argument (`M28 name`)
    pub fn with_file(&self, file_name: &str) -> String {
        format!("{} {}", self.code(), file_name)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// `M28 <name>`: open a file on storage for writing
pub fn begin_write(file_name: &str) -> String {
    Command::BeginWrite.with_file(file_name)
}

/// `M29 <name>`: close the file opened by [`begin_write`]
pub fn end_write(file_name: &str) -> String {
    Command::EndWrite.with_file(file_name)
}

/// `M30 <name>`: remove a file from storage
pub fn delete_file(file_name: &str) -> String {
    Command::DeleteFile.with_file(file_name)
}

/// `M6030":<name>" I1`: print a stored file
pub fn start_print(file_name: &str) -> String {
    format!("{}\":{}\" I1", Command::Print.code(), file_name)
}
