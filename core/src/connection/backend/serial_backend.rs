/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{ClearBuffer, SerialPort, SerialPortBuilderExt, SerialStream};

use crate::connection::port::{ConnectionType, MTKPort};
use crate::error::{Error, Result};

/// A CDC-ACM (or real UART) port. MediaTek devices show up as `ttyACM*` on
/// Linux and `COM*` on Windows in every boot stage.
pub struct SerialMTKPort {
    path: String,
    baudrate: u32,
    stream: Option<SerialStream>,
    connection_type: ConnectionType,
}

impl fmt::Debug for SerialMTKPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SerialMTKPort {{ path: {}, baudrate: {}, connection_type: {:?}, is_open: {} }}",
            self.path,
            self.baudrate,
            self.connection_type,
            self.stream.is_some()
        )
    }
}

impl SerialMTKPort {
    pub fn new(path: impl Into<String>, baudrate: u32, connection_type: ConnectionType) -> Self {
        SerialMTKPort { path: path.into(), baudrate, stream: None, connection_type }
    }

    fn stream(&mut self) -> Result<&mut SerialStream> {
        self.stream.as_mut().ok_or_else(|| Error::io("Serial port is not open"))
    }
}

#[async_trait]
impl MTKPort for SerialMTKPort {
    async fn open(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let stream = tokio_serial::new(&self.path, self.baudrate)
            .timeout(Duration::from_secs(2))
            .open_native_async()
            .map_err(|e| Error::io(format!("Failed to open {}: {}", self.path, e)))?;

        debug!("Opened serial port {} at {} baud", self.path, self.baudrate);
        self.stream = Some(stream);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.stream = None;
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream()?;
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let stream = self.stream()?;
        match tokio::time::timeout(timeout, stream.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream
                .clear(ClearBuffer::All)
                .map_err(|e| Error::io(format!("Failed to clear serial buffers: {}", e)))?;
        }
        Ok(())
    }

    fn get_connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    fn get_port_name(&self) -> String {
        self.path.clone()
    }
}
