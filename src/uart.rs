//! UART module
//!
//! Hardware serial endpoints for the device: the UART peripherals and, on
//! chips that have one, the USB Serial/JTAG controller. Both are polled, never
//! blocked on, so a single engine thread can service the network side too.

use esp_idf_hal::delay::NON_BLOCK;
use esp_idf_hal::gpio;
use esp_idf_hal::peripheral::Peripheral;
use esp_idf_hal::prelude::*;
use esp_idf_hal::uart::{config, Uart, UartDriver};
use log::{debug, info, trace};

use crate::config::{Parity, SerialFormat, StopBits};
use crate::error::{Error, Result};
use crate::transport::{Endpoint, SerialPort};

/// Default line settings until the bridge applies its own
const DEFAULT_BAUD: u32 = 9600;

/// A UART peripheral driven without flow control
pub struct UartEndpoint {
    uart: UartDriver<'static>,
}

impl UartEndpoint {
    pub fn new(
        uart: impl Peripheral<P = impl Uart> + 'static,
        tx_pin: impl Peripheral<P = impl gpio::OutputPin> + 'static,
        rx_pin: impl Peripheral<P = impl gpio::InputPin> + 'static,
    ) -> Result<Self> {
        let uart_config = config::Config::new().baudrate(Hertz(DEFAULT_BAUD));

        let uart = UartDriver::new(
            uart,
            tx_pin,
            rx_pin,
            Option::<gpio::Gpio0>::None, // CTS pin (not used)
            Option::<gpio::Gpio1>::None, // RTS pin (not used)
            &uart_config,
        )
        .map_err(|e| Error::Serial(format!("Failed to create UART driver: {}", e)))?;

        info!("UART{} driver ready", uart.port());
        Ok(Self { uart })
    }
}

fn data_bits(format: SerialFormat) -> config::DataBits {
    match format.data_bits() {
        5 => config::DataBits::DataBits5,
        6 => config::DataBits::DataBits6,
        7 => config::DataBits::DataBits7,
        _ => config::DataBits::DataBits8,
    }
}

fn parity(format: SerialFormat) -> config::Parity {
    match format.parity() {
        Parity::None => config::Parity::ParityNone,
        Parity::Even => config::Parity::ParityEven,
        Parity::Odd => config::Parity::ParityOdd,
    }
}

fn stop_bits(format: SerialFormat) -> config::StopBits {
    match format.stop_bits() {
        StopBits::One => config::StopBits::STOP1,
        StopBits::Two => config::StopBits::STOP2,
    }
}

impl Endpoint for UartEndpoint {
    fn available(&mut self) -> usize {
        self.uart.remaining_read().unwrap_or(0)
    }

    fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
        match self.uart.read(buf, NON_BLOCK) {
            Ok(len) => len,
            Err(e) => {
                // a timeout just means nothing arrived
                trace!("UART read returned {}", e);
                0
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut rest = data;
        while !rest.is_empty() {
            let written = self
                .uart
                .write(rest)
                .map_err(|e| Error::Serial(format!("Failed to write to UART: {}", e)))?;
            rest = &rest[written..];
        }
        Ok(())
    }
}

impl SerialPort for UartEndpoint {
    fn configure(&mut self, baud: u32, format: SerialFormat) -> Result<()> {
        self.uart
            .change_baudrate(Hertz(baud))
            .map_err(|e| Error::Serial(format!("Failed to set baudrate {}: {}", baud, e)))?;
        self.uart.change_data_bits(data_bits(format))?;
        self.uart.change_parity(parity(format))?;
        self.uart.change_stop_bits(stop_bits(format))?;
        debug!("UART{} set to {} {}", self.uart.port(), baud, format);
        Ok(())
    }
}

#[cfg(feature = "usb-cdc")]
pub use usb::UsbCdcEndpoint;

#[cfg(feature = "usb-cdc")]
mod usb {
    use esp_idf_hal::delay::NON_BLOCK;
    use esp_idf_hal::peripheral::Peripheral;
    use esp_idf_hal::usb_serial::{UsbDMinGpio, UsbDPlusGpio, UsbSerialConfig, UsbSerialDriver, USB_SERIAL};
    use log::{info, trace};

    use crate::config::SerialFormat;
    use crate::error::{Error, Result};
    use crate::transport::{Endpoint, SerialPort};

    /// Ticks a write may wait for the host to drain the FIFO
    const WRITE_TIMEOUT_TICKS: u32 = 100;

    /// The USB Serial/JTAG controller as a serial port
    ///
    /// The driver can't report how much is buffered, so reads are staged
    /// through a small local buffer.
    pub struct UsbCdcEndpoint {
        usb: UsbSerialDriver<'static>,
        staged: heapless::Vec<u8, 64>,
    }

    impl UsbCdcEndpoint {
        pub fn new(
            usb: impl Peripheral<P = USB_SERIAL> + 'static,
            d_min: impl Peripheral<P = UsbDMinGpio> + 'static,
            d_plus: impl Peripheral<P = UsbDPlusGpio> + 'static,
        ) -> Result<Self> {
            let usb = UsbSerialDriver::new(usb, d_min, d_plus, &UsbSerialConfig::new())
                .map_err(|e| Error::Serial(format!("Failed to create USB serial driver: {}", e)))?;
            info!("USB serial driver ready");
            Ok(Self {
                usb,
                staged: heapless::Vec::new(),
            })
        }

        fn fill(&mut self) {
            if !self.staged.is_empty() {
                return;
            }
            let mut chunk = [0u8; 64];
            match self.usb.read(&mut chunk, NON_BLOCK) {
                Ok(len) => {
                    // capacity matches the chunk, can't overflow
                    let _ = self.staged.extend_from_slice(&chunk[..len]);
                }
                Err(e) => trace!("USB serial read returned {}", e),
            }
        }
    }

    impl Endpoint for UsbCdcEndpoint {
        fn available(&mut self) -> usize {
            self.fill();
            self.staged.len()
        }

        fn read_up_to(&mut self, buf: &mut [u8]) -> usize {
            self.fill();
            let n = buf.len().min(self.staged.len());
            buf[..n].copy_from_slice(&self.staged[..n]);
            let rest: heapless::Vec<u8, 64> = self.staged[n..].iter().copied().collect();
            self.staged = rest;
            n
        }

        fn write(&mut self, data: &[u8]) -> Result<()> {
            let mut rest = data;
            while !rest.is_empty() {
                let written = self
                    .usb
                    .write(rest, WRITE_TIMEOUT_TICKS)
                    .map_err(|e| Error::Serial(format!("Failed to write to USB serial: {}", e)))?;
                if written == 0 {
                    return Err(Error::Serial("USB host is not reading".to_string()));
                }
                rest = &rest[written..];
            }
            Ok(())
        }
    }

    impl SerialPort for UsbCdcEndpoint {
        /// Line settings mean nothing on a USB CDC port
        fn configure(&mut self, _baud: u32, _format: SerialFormat) -> Result<()> {
            Ok(())
        }
    }
}
