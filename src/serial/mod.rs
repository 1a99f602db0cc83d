use std::time::Duration;

pub(crate) mod client;
pub(crate) mod frame;

pub use tokio_serial::{DataBits, FlowControl, Parity, StopBits};

/// Framing used on the serial line
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SerialMode {
    /// binary framing with a trailing CRC-16
    Rtu,
    /// `:` + hexadecimal + LRC + CR LF framing
    Ascii,
}

/// Serial port settings
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SerialSettings {
    /// baud rate of the port
    pub baud_rate: u32,
    /// number of bits per character
    pub data_bits: DataBits,
    /// types of flow control
    pub flow_control: FlowControl,
    /// number of stop bits
    pub stop_bits: StopBits,
    /// parity setting
    pub parity: Parity,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            stop_bits: StopBits::One,
            parity: Parity::None,
        }
    }
}

pub(crate) fn open(
    path: &str,
    settings: SerialSettings,
) -> Result<tokio_serial::SerialStream, tokio_serial::Error> {
    let builder = tokio_serial::new(path, settings.baud_rate)
        .data_bits(settings.data_bits)
        .flow_control(settings.flow_control)
        .stop_bits(settings.stop_bits)
        .parity(settings.parity)
        .timeout(Duration::from_secs(0));

    tokio_serial::SerialStream::open(&builder)
}
