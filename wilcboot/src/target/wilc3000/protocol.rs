//! WILC3000 vendor HCI commands.
//!
//! The boot ROM speaks plain HCI plus a handful of vendor commands for
//! memory access and UART control:
//!
//! | Command          | Opcode   | Parameters                          |
//! |------------------|----------|-------------------------------------|
//! | READ_MEM         | `0xFC01` | address u32, width `0x20`, count 1  |
//! | WRITE_MEM        | `0xFC52` | address u32, length u32, then data  |
//! | UPDATE_BAUDRATE  | `0xFC53` | baud u32, flow control u8           |
//! | WRITE_BD_ADDR    | `0xFC54` | 6 address bytes, wire order         |
//! | CPU_RESET        | `0xFC55` | none                                |

use crate::{
    image::{CHUNK_SIZE, FirmwareChunk},
    protocol::{
        Command, DeviceAddress,
        hci::{COMMAND_BUFFER_SIZE, opcode},
    },
};

/// Read controller memory.
pub const READ_MEM: u16 = 0xFC01;

/// Write controller memory.
pub const WRITE_MEM: u16 = 0xFC52;

/// Change the controller's UART rate.
pub const UPDATE_BAUDRATE: u16 = 0xFC53;

/// Program the device address.
pub const WRITE_BD_ADDR: u16 = 0xFC54;

/// Restart the controller CPU from the downloaded image.
pub const CPU_RESET: u16 = 0xFC55;

/// Register holding the Bluetooth clock source selection.
pub const CLOCK_SOURCE_REGISTER: u32 = 0x4000_1028;

/// Clock source value meaning the PLL is locked; the controller UART then
/// runs from a doubled clock and must be told half the wanted rate.
pub const CLOCK_SOURCE_PLL_LOCKED: u8 = 3;

/// HCI version reported once the firmware (rather than the boot ROM) runs.
pub const FIRMWARE_HCI_VERSION: u8 = 6;

/// Index of the HCI version in the Read Local Version return parameters.
pub const VERSION_PARAM_INDEX: usize = 0;

/// Index of the clock source byte in the READ_MEM return parameters.
pub const CLOCK_SOURCE_PARAM_INDEX: usize = 1;

/// Buffer needed for a write-memory command carrying a full chunk.
pub const WRITE_MEM_BUFFER_SIZE: usize = COMMAND_BUFFER_SIZE + CHUNK_SIZE;

/// HCI reset.
pub fn reset() -> Command {
    Command::new(opcode::RESET)
}

/// Read local version, used to tell boot ROM from running firmware.
pub fn read_local_version() -> Command {
    Command::new(opcode::READ_LOCAL_VERSION)
}

/// Read the controller's own device address.
pub fn read_bd_addr() -> Command {
    Command::new(opcode::READ_BD_ADDR)
}

/// Read the clock source register.
pub fn read_clock_source() -> Command {
    Command::new(READ_MEM)
        .param_u32(CLOCK_SOURCE_REGISTER)
        .param_u8(0x20)
        .param_u8(0x01)
}

/// Switch the controller UART to `baud`.
pub fn update_baudrate(baud: u32, flow_control: bool) -> Command {
    Command::new(UPDATE_BAUDRATE)
        .param_u32(baud)
        .param_u8(u8::from(flow_control))
}

/// Program the device address.
pub fn write_bd_addr(address: DeviceAddress) -> Command {
    Command::new(WRITE_BD_ADDR).param_bytes(&address.to_wire())
}

/// Write one firmware chunk to its load address.
#[allow(clippy::cast_possible_truncation)] // chunks never exceed CHUNK_SIZE
pub fn write_memory(chunk: FirmwareChunk) -> Command {
    Command::new(WRITE_MEM)
        .param_u32(chunk.address)
        .param_u32(chunk.data.len() as u32)
        .with_payload(chunk.data)
}

/// CPU reset command.
pub fn cpu_reset() -> Command {
    Command::new(CPU_RESET)
}

/// Buffer size to request from the transport for `command`.
pub fn buffer_size(command: &Command) -> usize {
    if command.opcode() == WRITE_MEM {
        WRITE_MEM_BUFFER_SIZE
    } else {
        COMMAND_BUFFER_SIZE
    }
}
