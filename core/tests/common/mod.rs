/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use mtkflash::codec::checksum::{additive16, xor16};
use mtkflash::codec::{Codec, Frame, FrameConfig, HEADER_LEN};
use mtkflash::connection::port::{ConnectionType, MTKPort};
use mtkflash::da::{DA, DAEntryRegion, DAType, NextStageProof, PayloadImage, StaticImages};
use mtkflash::error::{Error, Result};
use mtkflash::{ChipConfig, DialectTable};

pub const BLOCK_SIZE: u32 = 512;
pub const DA1_ADDR: u32 = 0x0020_0000;
pub const DA2_ADDR: u32 = 0x4000_0000;
pub const PAYLOAD_ADDR: u32 = 0x0010_0A00;
pub const UPLOAD_PACKET: usize = 0x400;
pub const BOOT_BLOCKS: u64 = 64;

const SYNC_SIGNAL: u32 = 0x434E5953;
const STATUS_UNSUPPORTED: u32 = 0xC0010004;
const STATUS_ABORT: u32 = 0xC0010002;
const STATUS_CHECKSUM: u32 = 0xC0010012;
const STATUS_RANGE: u32 = 0xC0010013;

const ACK: u8 = 0x5A;
const NACK: u8 = 0xA5;
const ABORT: u8 = 0xEE;

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Host end of an in-memory pipe.
#[derive(Debug)]
pub struct DuplexPort {
    stream: DuplexStream,
    resets: Arc<AtomicUsize>,
}

impl DuplexPort {
    pub fn new(stream: DuplexStream) -> Self {
        DuplexPort { stream, resets: Arc::new(AtomicUsize::new(0)) }
    }
}

#[async_trait]
impl MTKPort for DuplexPort {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await.map_err(|e| Error::io(e.to_string()))
    }

    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match tokio::time::timeout(timeout, self.stream.read(buf)).await {
            Ok(Ok(n)) => Ok(n),
            Ok(Err(e)) => Err(Error::io(e.to_string())),
            Err(_) => Err(Error::Timeout(timeout)),
        }
    }

    async fn reset(&mut self) -> Result<()> {
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn get_connection_type(&self) -> ConnectionType {
        ConnectionType::Brom
    }

    fn get_port_name(&self) -> String {
        "duplex".into()
    }
}

/// Counts every send and recv going through the wrapped port.
#[derive(Debug)]
pub struct CountingPort<P> {
    inner: P,
    calls: Arc<AtomicUsize>,
}

impl<P: MTKPort> CountingPort<P> {
    pub fn new(inner: P) -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (CountingPort { inner, calls: calls.clone() }, calls)
    }
}

#[async_trait]
impl<P: MTKPort> MTKPort for CountingPort<P> {
    async fn open(&mut self) -> Result<()> {
        self.inner.open().await
    }

    async fn close(&mut self) -> Result<()> {
        self.inner.close().await
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.send(data).await
    }

    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.recv(buf, timeout).await
    }

    async fn reset(&mut self) -> Result<()> {
        self.inner.reset().await
    }

    fn get_connection_type(&self) -> ConnectionType {
        self.inner.get_connection_type()
    }

    fn get_port_name(&self) -> String {
        self.inner.get_port_name()
    }
}

/// Replays canned device bytes. Reading past the script times out at once.
#[derive(Debug, Default)]
pub struct ScriptedPort {
    rx: VecDeque<u8>,
    pub tx: Arc<Mutex<Vec<u8>>>,
}

impl ScriptedPort {
    pub fn new(script: &[u8]) -> Self {
        ScriptedPort { rx: script.iter().copied().collect(), tx: Arc::default() }
    }
}

#[async_trait]
impl MTKPort for ScriptedPort {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.tx.lock().unwrap().extend_from_slice(data);
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if self.rx.is_empty() {
            return Err(Error::Timeout(timeout));
        }
        let n = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    async fn reset(&mut self) -> Result<()> {
        Ok(())
    }

    fn get_connection_type(&self) -> ConnectionType {
        ConnectionType::Brom
    }

    fn get_port_name(&self) -> String {
        "scripted".into()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimDa {
    XFlash,
    Legacy,
}

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub hw_code: u16,
    /// Answers the BL version probe like a Preloader of this version.
    pub preloader: Option<u8>,
    pub da: SimDa,
    /// Probes swallowed before the first answer.
    pub ignored_probes: usize,
    /// Never answers the handshake.
    pub silent: bool,
    /// What the payload sends once jumped to. `None` is a payload that hangs.
    pub payload_proof: Option<NextStageProof>,
    /// `SEND_DA` attempts whose first chunk ack is wrong.
    pub bad_upload_attempts: usize,
    /// Garbage written in front of the DA1 sync status frame.
    pub noise_before_sync: usize,
    pub read_packet: usize,
    pub write_packet: usize,
    /// Corrupts the read chunk covering this user area offset, this many times.
    pub corrupt_read: Option<(u64, usize)>,
    /// Rejects this chunk index of every write.
    pub fail_write_chunk: Option<usize>,
    pub user: Vec<u8>,
    /// Table the legacy DA hands out on request.
    pub pmt: Option<Vec<u8>>,
}

impl SimConfig {
    pub fn new(hw_code: u16, da: SimDa, user: Vec<u8>) -> Self {
        SimConfig {
            hw_code,
            preloader: None,
            da,
            ignored_probes: 0,
            silent: false,
            payload_proof: Some(NextStageProof::AckWord(0xA1A2A3A4)),
            bad_upload_attempts: 0,
            noise_before_sync: 0,
            read_packet: 0x1000,
            write_packet: 0x200,
            corrupt_read: None,
            fail_write_chunk: None,
            user,
            pmt: None,
        }
    }
}

#[derive(Debug, Default)]
pub struct SimState {
    /// Section code to contents. User is 8, boot1 1, boot2 2.
    pub sections: HashMap<u32, Vec<u8>>,
    /// (address, chunk count, every ack correct) per `SEND_DA`.
    pub uploads: Vec<(u32, usize, bool)>,
    pub jumps: Vec<u32>,
    pub handshakes: usize,
    pub da2_len: usize,
    pub resent_chunks: usize,
    pub shutdown: Option<bool>,
    pub corrupt_left: usize,
}

impl SimState {
    pub fn user(&self) -> &[u8] {
        self.sections.get(&8).map(Vec::as_slice).unwrap_or_default()
    }
}

pub struct SimHandle {
    pub state: Arc<Mutex<SimState>>,
    pub task: JoinHandle<()>,
    replug: Arc<Notify>,
}

impl SimHandle {
    pub fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    /// Power cycles the device back into its ROM loop. Storage survives.
    pub fn replug(&self) {
        self.replug.notify_one();
    }
}

/// Starts a simulated device and returns the port talking to it.
pub fn spawn_device(config: SimConfig) -> (DuplexPort, SimHandle) {
    let (host, device) = tokio::io::duplex(1 << 20);

    let mut sections = HashMap::new();
    sections.insert(8, config.user.clone());
    sections.insert(1, vec![0u8; (BOOT_BLOCKS * BLOCK_SIZE as u64) as usize]);
    sections.insert(2, vec![0u8; (BOOT_BLOCKS * BLOCK_SIZE as u64) as usize]);
    let corrupt_left = config.corrupt_read.map_or(0, |(_, n)| n);
    let state = Arc::new(Mutex::new(SimState { sections, corrupt_left, ..Default::default() }));

    let mut sim = Sim { io: device, codec: Codec::new(FrameConfig::default()), config, state: state.clone() };
    let replug = Arc::new(Notify::new());
    let task = tokio::spawn({
        let replug = replug.clone();
        async move {
            loop {
                tokio::select! {
                    biased;
                    _ = replug.notified() => continue,
                    _ = sim.run() => break,
                }
            }
        }
    });

    (DuplexPort::new(host), SimHandle { state, task, replug })
}

type IoResult<T> = std::io::Result<T>;

fn bad_data(msg: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, msg.to_string())
}

fn u32_le(data: &[u8], off: usize) -> u32 {
    u32::from_le_bytes(data[off..off + 4].try_into().unwrap())
}

fn u64_le(data: &[u8], off: usize) -> u64 {
    u64::from_le_bytes(data[off..off + 8].try_into().unwrap())
}

struct Sim {
    io: DuplexStream,
    codec: Codec,
    config: SimConfig,
    state: Arc<Mutex<SimState>>,
}

impl Sim {
    async fn read_n(&mut self, n: usize) -> IoResult<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.io.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn read_u8(&mut self) -> IoResult<u8> {
        self.io.read_u8().await
    }

    async fn write(&mut self, data: &[u8]) -> IoResult<()> {
        self.io.write_all(data).await
    }

    async fn echo(&mut self, n: usize) -> IoResult<Vec<u8>> {
        let data = self.read_n(n).await?;
        self.write(&data).await?;
        Ok(data)
    }

    async fn status16(&mut self) -> IoResult<()> {
        self.write(&[0, 0]).await
    }

    async fn run(&mut self) -> IoResult<()> {
        self.handshake().await?;

        loop {
            let cmd = self.read_u8().await?;
            match cmd {
                // A payload restarting the ROM loop is probed again
                0xA0 => {
                    self.write(&[0x5F]).await?;
                    self.finish_handshake().await?;
                }
                0xFE => {
                    let answer = self.config.preloader.unwrap_or(0xFE);
                    self.write(&[answer]).await?;
                }
                0xFD => {
                    self.write(&[cmd]).await?;
                    let hw_code = self.config.hw_code;
                    self.write(&hw_code.to_be_bytes()).await?;
                    self.status16().await?;
                }
                0xFC => {
                    self.write(&[cmd]).await?;
                    self.write(&[0x8A, 0x00, 0xCA, 0x00, 0x00, 0x00]).await?;
                    self.status16().await?;
                }
                0xD8 => {
                    self.write(&[cmd]).await?;
                    self.write(&0u32.to_be_bytes()).await?;
                    self.status16().await?;
                }
                0xE7 | 0xE1 => {
                    self.write(&[cmd]).await?;
                    let (len, fill) = if cmd == 0xE7 { (32u32, 0x11u8) } else { (16, 0x22) };
                    self.write(&len.to_be_bytes()).await?;
                    self.write(&vec![fill; len as usize]).await?;
                    self.status16().await?;
                }
                0xD1 => {
                    self.write(&[cmd]).await?;
                    let addr = self.echo(4).await?;
                    let count = self.echo(4).await?;
                    let addr = u32::from_be_bytes(addr.try_into().unwrap());
                    let count = u32::from_be_bytes(count.try_into().unwrap());
                    self.status16().await?;
                    for i in 0..count {
                        self.write(&(addr + i * 4).to_be_bytes()).await?;
                    }
                    self.status16().await?;
                }
                0xD7 => self.send_da().await?,
                0xD5 => {
                    self.write(&[cmd]).await?;
                    let addr = self.echo(4).await?;
                    let addr = u32::from_be_bytes(addr.try_into().unwrap());
                    self.status16().await?;
                    self.state.lock().unwrap().jumps.push(addr);

                    if addr == PAYLOAD_ADDR {
                        match self.config.payload_proof {
                            Some(NextStageProof::AckWord(word)) => self.write(&word.to_be_bytes()).await?,
                            Some(NextStageProof::SyncByte(byte)) => self.write(&[byte]).await?,
                            Some(NextStageProof::Handshake) => {}
                            None => return self.hang().await,
                        }
                    } else {
                        return match self.config.da {
                            SimDa::XFlash => self.xflash().await,
                            SimDa::Legacy => self.legacy().await,
                        };
                    }
                }
                _ => {}
            }
        }
    }

    async fn hang(&mut self) -> IoResult<()> {
        loop {
            self.read_u8().await?;
        }
    }

    async fn handshake(&mut self) -> IoResult<()> {
        let mut probes = 0;
        loop {
            if self.read_u8().await? != 0xA0 {
                continue;
            }
            probes += 1;
            if self.config.silent || probes <= self.config.ignored_probes {
                continue;
            }
            self.write(&[0x5F]).await?;
            break;
        }
        self.finish_handshake().await
    }

    async fn finish_handshake(&mut self) -> IoResult<()> {
        for _ in 0..3 {
            let byte = self.read_u8().await?;
            self.write(&[!byte]).await?;
        }
        self.state.lock().unwrap().handshakes += 1;
        Ok(())
    }

    async fn send_da(&mut self) -> IoResult<()> {
        self.write(&[0xD7]).await?;
        let addr = u32::from_be_bytes(self.echo(4).await?.try_into().unwrap());
        let len = u32::from_be_bytes(self.echo(4).await?.try_into().unwrap()) as usize;
        self.echo(4).await?;
        self.status16().await?;

        let previous = self.state.lock().unwrap().uploads.iter().filter(|u| u.0 == addr).count();
        let spoil = previous < self.config.bad_upload_attempts;

        let mut received = 0;
        let mut chunks = 0;
        while received < len {
            let n = UPLOAD_PACKET.min(len - received);
            let chunk = self.read_n(n).await?;
            let mut ack = xor16(&chunk);
            if spoil && chunks == 0 {
                ack ^= 0xFFFF;
            }
            self.write(&ack.to_be_bytes()).await?;
            received += n;
            chunks += 1;
        }

        self.status16().await?;
        self.state.lock().unwrap().uploads.push((addr, chunks, !spoil));
        Ok(())
    }

    fn should_corrupt(&mut self, start: u64, len: usize) -> bool {
        let Some((offset, _)) = self.config.corrupt_read else {
            return false;
        };
        let mut state = self.state.lock().unwrap();
        if state.corrupt_left > 0 && (start..start + len as u64).contains(&offset) {
            state.corrupt_left -= 1;
            return true;
        }
        false
    }

    fn section_len(&self, section: u32) -> u64 {
        self.state.lock().unwrap().sections.get(&section).map_or(0, |s| s.len() as u64)
    }

    fn in_range(&self, section: u32, addr: u64, size: u64) -> bool {
        addr.checked_add(size).is_some_and(|end| end <= self.section_len(section))
    }

    fn load(&self, section: u32, addr: u64, len: usize) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        let data = &state.sections[&section];
        data[addr as usize..addr as usize + len].to_vec()
    }

    fn store(&self, section: u32, addr: u64, data: &[u8]) {
        let mut state = self.state.lock().unwrap();
        let target = state.sections.get_mut(&section).unwrap();
        target[addr as usize..addr as usize + data.len()].copy_from_slice(data);
    }

    // XFlash

    async fn read_frame(&mut self) -> IoResult<Frame> {
        let mut header = [0u8; HEADER_LEN];
        self.io.read_exact(&mut header).await?;
        let (opcode, len) = self.codec.parse_header(&header).map_err(bad_data)?;
        let body = self.read_n(len + self.codec.trailer_len()).await?;
        self.codec.finish(opcode, &body[..len], &body[len..]).map_err(bad_data)
    }

    async fn read_word(&mut self) -> IoResult<u32> {
        let frame = self.read_frame().await?;
        Ok(u32_le(&frame.payload, 0))
    }

    async fn send_frame(&mut self, payload: &[u8], corrupt: bool) -> IoResult<()> {
        let mut bytes = self.codec.encode(1, payload);
        if corrupt {
            let last = bytes.len() - 1;
            bytes[last] ^= 0xFF;
        }
        self.write(&bytes).await
    }

    async fn status(&mut self, code: u32) -> IoResult<()> {
        self.send_frame(&code.to_le_bytes(), false).await
    }

    async fn xflash(&mut self) -> IoResult<()> {
        self.write(&[0xC0]).await?;
        // Sync signal, not answered
        self.read_frame().await?;
        // Environment and hw init params, each command and parameter acked
        for _ in 0..4 {
            self.read_frame().await?;
            self.status(0).await?;
        }
        if self.config.noise_before_sync > 0 {
            let noise = vec![0x5A; self.config.noise_before_sync];
            self.write(&noise).await?;
        }
        self.status(SYNC_SIGNAL).await?;

        loop {
            let cmd = self.read_word().await?;
            match cmd {
                0x010009 => self.device_ctrl().await?,
                0x010008 => {
                    self.status(0).await?;
                    let param = self.read_frame().await?.payload;
                    let len = u64_le(&param, 8) as usize;
                    let mut received = 0;
                    while received < len {
                        received += self.read_frame().await?.payload.len();
                    }
                    self.state.lock().unwrap().da2_len = received;
                    self.status(0).await?;
                    self.status(SYNC_SIGNAL).await?;
                }
                0x010005 => self.xflash_read().await?,
                0x010004 => self.xflash_write().await?,
                0x010003 => {
                    self.status(0).await?;
                    let param = self.read_frame().await?.payload;
                    let (section, addr, size) = (u32_le(&param, 4), u64_le(&param, 8), u64_le(&param, 16));
                    if !self.in_range(section, addr, size) {
                        self.status(STATUS_RANGE).await?;
                        continue;
                    }
                    self.status(0).await?;
                    self.store(section, addr, &vec![0u8; size as usize]);
                    self.status(0).await?;
                }
                0x010007 => {
                    self.status(0).await?;
                    let param = self.read_frame().await?.payload;
                    self.state.lock().unwrap().shutdown = Some(u32_le(&param, 0) != 0);
                    self.status(0).await?;
                    return Ok(());
                }
                _ => self.status(0xC0010003).await?,
            }
        }
    }

    async fn device_ctrl(&mut self) -> IoResult<()> {
        self.status(0).await?;
        let ctrl = self.read_word().await?;

        let data = match ctrl {
            0x040007 => {
                let mut data = (self.config.write_packet as u32).to_le_bytes().to_vec();
                data.extend_from_slice(&(self.config.read_packet as u32).to_le_bytes());
                data
            }
            0x04000D => {
                let mut data = self.config.hw_code.to_le_bytes().to_vec();
                data.extend_from_slice(&[0x00, 0x8A, 0x00, 0xCA, 0x00, 0x00]);
                data
            }
            0x04000B => 0x12u32.to_le_bytes().to_vec(),
            0x040001 => {
                let mut info = vec![0u8; 0x48];
                info[0..4].copy_from_slice(&1u32.to_le_bytes());
                info[4..8].copy_from_slice(&BLOCK_SIZE.to_le_bytes());
                let boot = BOOT_BLOCKS * BLOCK_SIZE as u64;
                info[8..16].copy_from_slice(&boot.to_le_bytes());
                info[0x10..0x18].copy_from_slice(&boot.to_le_bytes());
                info[0x40..0x48].copy_from_slice(&(self.config.user.len() as u64).to_le_bytes());
                info
            }
            _ => return self.status(STATUS_UNSUPPORTED).await,
        };

        self.status(0).await?;
        self.send_frame(&data, false).await?;
        self.status(0).await
    }

    async fn xflash_read(&mut self) -> IoResult<()> {
        self.status(0).await?;
        let param = self.read_frame().await?.payload;
        let (section, addr, size) = (u32_le(&param, 4), u64_le(&param, 8), u64_le(&param, 16));
        if !self.in_range(section, addr, size) {
            return self.status(STATUS_RANGE).await;
        }
        self.status(0).await?;

        let mut sent = 0usize;
        while sent < size as usize {
            let len = self.config.read_packet.min(size as usize - sent);
            let start = addr + sent as u64;
            let chunk = self.load(section, start, len);
            let corrupt = section == 8 && self.should_corrupt(start, len);
            self.send_frame(&chunk, corrupt).await?;

            loop {
                let reply = self.read_frame().await?;
                if reply.opcode == 3 {
                    self.state.lock().unwrap().resent_chunks += 1;
                    let corrupt = section == 8 && self.should_corrupt(start, len);
                    self.send_frame(&chunk, corrupt).await?;
                    continue;
                }
                if u32_le(&reply.payload, 0) == 1 {
                    return self.status(STATUS_ABORT).await;
                }
                self.status(0).await?;
                break;
            }
            sent += len;
        }
        Ok(())
    }

    async fn xflash_write(&mut self) -> IoResult<()> {
        self.status(0).await?;
        let param = self.read_frame().await?.payload;
        let (section, addr, size) = (u32_le(&param, 4), u64_le(&param, 8), u64_le(&param, 16));
        if !self.in_range(section, addr, size) {
            return self.status(STATUS_RANGE).await;
        }
        self.status(0).await?;

        let mut received = 0usize;
        let mut index = 0;
        while received < size as usize {
            self.read_frame().await?;
            self.status(0).await?;
            let checksum = self.read_word().await?;
            self.status(0).await?;
            let data = self.read_frame().await?.payload;

            if Some(index) == self.config.fail_write_chunk || additive16(&data) as u32 != checksum {
                return self.status(STATUS_CHECKSUM).await;
            }

            self.store(section, addr + received as u64, &data);
            received += data.len();
            index += 1;
            self.status(0).await?;
        }

        self.status(0).await
    }

    // Legacy

    async fn read_u32_be(&mut self) -> IoResult<u32> {
        self.io.read_u32().await
    }

    async fn read_u64_be(&mut self) -> IoResult<u64> {
        self.io.read_u64().await
    }

    async fn nack(&mut self, status: u32) -> IoResult<()> {
        self.write(&[NACK]).await?;
        self.write(&status.to_be_bytes()).await
    }

    async fn legacy(&mut self) -> IoResult<()> {
        self.write(&[0xC0, 3, 1]).await?;
        self.read_u8().await?;

        let boot = BOOT_BLOCKS * BLOCK_SIZE as u64;
        self.write(&[0x01]).await?;
        self.write(&BLOCK_SIZE.to_be_bytes()).await?;
        self.write(&(self.config.user.len() as u64).to_be_bytes()).await?;
        self.write(&boot.to_be_bytes()).await?;
        self.write(&boot.to_be_bytes()).await?;
        self.read_u8().await?;

        loop {
            let cmd = self.read_u8().await?;
            match cmd {
                0xD6 => self.legacy_read().await?,
                0x62 => self.legacy_write().await?,
                0xD4 => {
                    let section = self.read_n(2).await?[1] as u32;
                    let addr = self.read_u64_be().await?;
                    let len = self.read_u64_be().await?;
                    if !self.in_range(section, addr, len) {
                        self.nack(STATUS_RANGE).await?;
                        continue;
                    }
                    self.store(section, addr, &vec![0u8; len as usize]);
                    self.write(&[ACK]).await?;
                }
                0xD2 => {
                    self.read_n(2).await?;
                    let Some(pmt) = self.config.pmt.clone() else {
                        self.nack(STATUS_UNSUPPORTED).await?;
                        continue;
                    };
                    self.write(&[ACK]).await?;
                    self.write(&(pmt.len() as u32).to_be_bytes()).await?;
                    loop {
                        self.write(&pmt).await?;
                        self.write(&additive16(&pmt).to_be_bytes()).await?;
                        if self.read_u8().await? != NACK {
                            break;
                        }
                    }
                }
                0xD9 => {
                    let reboot = self.read_u8().await?;
                    self.state.lock().unwrap().shutdown = Some(reboot != 0);
                    self.write(&[ACK]).await?;
                    return Ok(());
                }
                _ => {}
            }
        }
    }

    async fn legacy_read(&mut self) -> IoResult<()> {
        let section = self.read_n(2).await?[1] as u32;
        let addr = self.read_u64_be().await?;
        let size = self.read_u64_be().await?;
        let packet = self.read_u32_be().await? as usize;
        if !self.in_range(section, addr, size) {
            return self.nack(STATUS_RANGE).await;
        }
        self.write(&[ACK]).await?;

        let mut sent = 0usize;
        while sent < size as usize {
            let len = packet.min(size as usize - sent);
            let start = addr + sent as u64;
            let chunk = self.load(section, start, len);
            let mut corrupt = section == 8 && self.should_corrupt(start, len);

            loop {
                let checksum = additive16(&chunk) ^ if corrupt { 0xFFFF } else { 0 };
                self.write(&chunk).await?;
                self.write(&checksum.to_be_bytes()).await?;

                match self.read_u8().await? {
                    NACK => {
                        self.state.lock().unwrap().resent_chunks += 1;
                        corrupt = section == 8 && self.should_corrupt(start, len);
                    }
                    ABORT => return Ok(()),
                    _ => break,
                }
            }
            sent += len;
        }
        Ok(())
    }

    async fn legacy_write(&mut self) -> IoResult<()> {
        let section = self.read_n(2).await?[1] as u32;
        let addr = self.read_u64_be().await?;
        let size = self.read_u64_be().await?;
        let packet = self.read_u32_be().await? as usize;
        if !self.in_range(section, addr, size) {
            return self.nack(STATUS_RANGE).await;
        }
        self.write(&[ACK]).await?;

        let mut received = 0usize;
        let mut index = 0;
        while received < size as usize {
            if self.read_u8().await? == ABORT {
                return self.write(&[ACK]).await;
            }

            let len = packet.min(size as usize - received);
            let data = self.read_n(len).await?;
            let checksum = self.io.read_u16().await?;
            if Some(index) == self.config.fail_write_chunk || additive16(&data) != checksum {
                return self.nack(STATUS_CHECKSUM).await;
            }

            self.store(section, addr + received as u64, &data);
            received += len;
            index += 1;
            self.write(&[ACK]).await?;
        }

        self.write(&[ACK]).await
    }
}

// Fixtures

/// A DA whose first stage uploads in exactly `da1_chunks` packets.
pub fn test_da(da_type: DAType, hw_code: u16, da1_chunks: usize) -> DA {
    let da1 = DAEntryRegion::new(vec![0xD1; UPLOAD_PACKET * da1_chunks], DA1_ADDR, 0);
    let mut regions = vec![da1];
    if da_type != DAType::Legacy {
        regions.push(DAEntryRegion::new(vec![0xD2; 0x9000], DA2_ADDR, 0));
    }
    DA::new(da_type, hw_code, regions)
}

pub fn test_payload(proof: NextStageProof) -> PayloadImage {
    PayloadImage { data: vec![0xAA; 0x600], addr: PAYLOAD_ADDR, entry: PAYLOAD_ADDR, proof }
}

pub fn images(da: DA) -> Arc<StaticImages> {
    Arc::new(StaticImages::new().with_da(da.hw_code, da))
}

pub fn dialects(hw_code: u16, da_type: DAType) -> DialectTable {
    DialectTable::new().with(hw_code, ChipConfig::new("MT-TEST", da_type))
}

/// A user area of `capacity` blocks holding a GPT with the given
/// `(name, first_lba, blocks)` partitions.
pub fn gpt_disk(capacity: u64, parts: &[(&str, u64, u64)]) -> Vec<u8> {
    let bs = BLOCK_SIZE as usize;
    let mut disk = vec![0u8; capacity as usize * bs];
    disk[510] = 0x55;
    disk[511] = 0xAA;

    let entries_start = 2 * bs;
    for (i, (name, first, blocks)) in parts.iter().enumerate() {
        let e = entries_start + i * 128;
        disk[e..e + 16].copy_from_slice(&[0xAF; 16]);
        disk[e + 16] = i as u8 + 1;
        disk[e + 32..e + 40].copy_from_slice(&first.to_le_bytes());
        disk[e + 40..e + 48].copy_from_slice(&(first + blocks - 1).to_le_bytes());
        for (j, unit) in name.encode_utf16().enumerate() {
            disk[e + 56 + j * 2..e + 58 + j * 2].copy_from_slice(&unit.to_le_bytes());
        }
    }
    let entries_crc = crc32fast::hash(&disk[entries_start..entries_start + 128 * 128]);

    let mut header = vec![0u8; 92];
    header[..8].copy_from_slice(b"EFI PART");
    header[8..12].copy_from_slice(&0x0001_0000u32.to_le_bytes());
    header[12..16].copy_from_slice(&92u32.to_le_bytes());
    header[24..32].copy_from_slice(&1u64.to_le_bytes());
    header[32..40].copy_from_slice(&(capacity - 1).to_le_bytes());
    header[40..48].copy_from_slice(&34u64.to_le_bytes());
    header[48..56].copy_from_slice(&(capacity - 34).to_le_bytes());
    header[72..80].copy_from_slice(&2u64.to_le_bytes());
    header[80..84].copy_from_slice(&128u32.to_le_bytes());
    header[84..88].copy_from_slice(&128u32.to_le_bytes());
    header[88..92].copy_from_slice(&entries_crc.to_le_bytes());
    let header_crc = crc32fast::hash(&header);
    header[16..20].copy_from_slice(&header_crc.to_le_bytes());

    disk[bs..bs + 92].copy_from_slice(&header);
    disk
}

/// A PMT with `(name, first_lba, blocks)` records.
pub fn pmt_table(parts: &[(&str, u64, u64)]) -> Vec<u8> {
    let mut table = b"PTv1".to_vec();
    table.extend_from_slice(&(parts.len() as u32).to_le_bytes());
    for (name, first, blocks) in parts {
        let mut record = [0u8; 88];
        record[..name.len()].copy_from_slice(name.as_bytes());
        record[64..72].copy_from_slice(&(blocks * BLOCK_SIZE as u64).to_le_bytes());
        record[72..80].copy_from_slice(&(first * BLOCK_SIZE as u64).to_le_bytes());
        table.extend_from_slice(&record);
    }
    table
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

pub fn no_progress() -> impl FnMut(usize, usize) + Send {
    |_, _| {}
}
