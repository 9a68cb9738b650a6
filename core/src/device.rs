/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::connection::Connection;
use crate::connection::port::{MTKPort, Timeouts};
use crate::core::cancel::CancelToken;
use crate::core::chipinfo::{BootStage, ChipInfo};
use crate::core::dialect::DialectTable;
use crate::core::partition::PartitionTable;
use crate::core::region::StorageRegion;
use crate::core::storage::StorageInfo;
use crate::da::{DAFile, DaSession, Dialect, ImageProvider, WriteReport};
use crate::error::{Error, Result};
use crate::session::{BromSession, Session, Stage, Step};

/// Handshake attempts before the device is declared unresponsive.
pub const HANDSHAKE_RETRIES: usize = 3;

/// A builder for creating a new [`Device`].
///
/// A MTKPort must be provided to build the device. Images are optional:
/// without a DA, [`Device::connect`] stops at the BROM or Preloader and only
/// identification and memory peeks are available.
///
/// # Example
/// ```rust,ignore
/// use mtkflash::{DeviceBuilder, SerialMTKPort};
/// use mtkflash::connection::port::ConnectionType;
///
/// let port = SerialMTKPort::new("/dev/ttyACM0", 115200, ConnectionType::Brom);
/// let da_data = std::fs::read("path/to/da/file")?;
/// let mut device =
///     DeviceBuilder::default().with_mtk_port(Box::new(port)).with_da_data(&da_data)?.build()?;
/// device.connect().await?;
/// ```
#[derive(Default)]
pub struct DeviceBuilder {
    mtk_port: Option<Box<dyn MTKPort>>,
    images: Option<Arc<dyn ImageProvider>>,
    dialects: Option<DialectTable>,
    timeouts: Timeouts,
}

impl DeviceBuilder {
    /// Assigns the MTK port to be used for the device connection.
    pub fn with_mtk_port(mut self, port: Box<dyn MTKPort>) -> Self {
        self.mtk_port = Some(port);
        self
    }

    /// Assigns the payload and DA source.
    pub fn with_images(mut self, images: Arc<dyn ImageProvider>) -> Self {
        self.images = Some(images);
        self
    }

    /// Parses a DA file and uses it as the image source.
    pub fn with_da_data(self, data: &[u8]) -> Result<Self> {
        let da_file = DAFile::parse_da(data)?;
        info!("Loaded DA file '{}' with {} entries", da_file.da_id, da_file.das.len());
        Ok(self.with_images(Arc::new(da_file)))
    }

    /// Chips the device may turn out to be. Defaults to [`DialectTable::builtin`].
    pub fn with_dialects(mut self, dialects: DialectTable) -> Self {
        self.dialects = Some(dialects);
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn build(self) -> Result<Device> {
        let port =
            self.mtk_port.ok_or_else(|| Error::conn("MTK port must be provided to build a Device."))?;

        Ok(Device {
            conn: Some(Connection::with_timeouts(port, self.timeouts)),
            session: None,
            chip: None,
            images: self.images,
            dialects: self.dialects.unwrap_or_else(DialectTable::builtin),
            last_step: Step::None,
            cancel: CancelToken::new(),
        })
    }
}

/// Awaits one connect step. On failure the live session goes to
/// [`Device::abort_connect`] and the wrapped error is returned.
macro_rules! or_abort {
    ($self:ident, $session:expr, $op:expr) => {{
        let res = $op.await;
        match res {
            Ok(v) => v,
            Err(e) => return Err($self.abort_connect($session, e).await),
        }
    }};
}

/// A MediaTek device reached through one port.
///
/// # Lifecycle
/// 1. Construct via [`DeviceBuilder`].
/// 2. Call [`Device::connect`]: handshake, identify, payload, DA upload and activation.
/// 3. Perform operations like `read_partition`, `write_partition`, etc.
/// 4. [`Device::disconnect`].
///
/// After a fatal error (transport failure, unresponsive device), or a write
/// the DA can't back out of, the session is dropped and `connect` has to be
/// called again. Nothing is retried
/// behind the caller's back.
pub struct Device {
    /// The connection while no session owns it.
    conn: Option<Connection>,
    session: Option<Session>,
    chip: Option<ChipInfo>,
    images: Option<Arc<dyn ImageProvider>>,
    dialects: DialectTable,
    last_step: Step,
    cancel: CancelToken,
}

impl Device {
    pub fn stage(&self) -> Stage {
        self.session.as_ref().map_or(Stage::Disconnected, Session::stage)
    }

    pub fn last_step(&self) -> Step {
        self.last_step
    }

    pub fn chip_info(&self) -> Option<&ChipInfo> {
        self.chip.as_ref()
    }

    pub fn dialects(&self) -> &DialectTable {
        &self.dialects
    }

    /// Token checked between chunks of writes and erases. Cancelling it
    /// stops the running (or next) operation, after which it is cleared.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Walks the boot chain up to a running DA.
    ///
    /// Does nothing if a session is already live. Without a DA image for
    /// the chip the device is left in the BROM or Preloader session.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_stranded() {
            self.teardown().await;
        }
        if self.session.is_some() {
            debug!("Already connected ({})", self.stage());
            return Ok(());
        }

        self.last_step = Step::None;
        let mut conn = self.conn.take().ok_or_else(|| Error::conn("Connection is not available"))?;
        if let Err(e) = conn.port.open().await {
            self.conn = Some(conn);
            return Err(e.in_stage(Stage::Disconnected, Step::None));
        }

        let mut brom = BromSession::new(conn);
        or_abort!(self, Session::Brom(brom), self.handshake(&mut brom));
        self.last_step = Step::Handshake;

        let chip = or_abort!(self, Session::Brom(brom), brom.identify());
        self.last_step = Step::Identify;
        self.chip = Some(chip.clone());

        let session = match brom.into_preloader() {
            Ok(preloader) => Session::Preloader(preloader),
            Err(brom) => Session::Brom(brom),
        };

        let Some(da) = self.images.as_ref().and_then(|images| images.download_agent(&chip)) else {
            if self.images.is_some() {
                let e = Error::unsupported(format!("No DA available for hw code 0x{:04X}", chip.hw_code));
                return Err(self.abort_connect(session, e).await);
            }
            info!("No DA images given, staying in {}", chip.boot_stage);
            self.session = Some(session);
            return Ok(());
        };

        let config = match self.dialects.lookup(chip.hw_code) {
            Some(config) => config.clone(),
            None => {
                let e = Error::unsupported(format!("Unknown chip, hw code 0x{:04X}", chip.hw_code));
                return Err(self.abort_connect(session, e).await);
            }
        };
        info!("Chip is {} ({} DA)", config.name, config.dialect);

        if let Err(e) = Dialect::check(da.da_type, &config) {
            return Err(self.abort_connect(session, e).await);
        }
        let Some(da1) = da.get_da1().cloned() else {
            let e = Error::proto("DA has no loadable stage");
            return Err(self.abort_connect(session, e).await);
        };

        let conn = match session {
            Session::Preloader(mut preloader) => {
                if config.payload_required {
                    warn!("{} usually needs a payload, which a Preloader can't take", config.name);
                }
                or_abort!(
                    self,
                    Session::Preloader(preloader),
                    preloader.send_da(&da1, config.packet_size)
                );
                preloader.into_connection()
            }
            Session::Brom(mut brom) => {
                let payload = self.images.as_ref().and_then(|images| images.payload(&chip));
                match payload {
                    Some(payload) => {
                        or_abort!(
                            self,
                            Session::Brom(brom),
                            brom.send_payload(&payload, config.packet_size)
                        );
                        self.last_step = Step::PayloadSent;
                        or_abort!(self, Session::Brom(brom), brom.confirm_payload(payload.proof));
                        self.last_step = Step::PayloadConfirmed;
                    }
                    None if config.payload_required => {
                        warn!("{} usually needs a payload before the DA, trying anyway", config.name);
                    }
                    None => {}
                }

                or_abort!(self, Session::Brom(brom), brom.upload_da(&da1, config.packet_size));
                brom.into_connection()
            }
            session @ Session::Da(_) => {
                let e = Error::proto("A DA session can't take another DA");
                return Err(self.abort_connect(session, e).await);
            }
        };
        self.last_step = Step::DaUploaded;

        let mut da_session = DaSession::new(conn, da.da_type, &config, chip.clone());
        or_abort!(self, Session::Da(da_session), da_session.activate(&da));
        self.last_step = Step::DaActivated;

        match da_session.identify().await {
            Ok(refreshed) => self.chip = Some(refreshed),
            Err(e) if !e.is_fatal() => warn!("DA could not refresh the chip id: {}", e),
            Err(e) => return Err(self.abort_connect(Session::Da(da_session), e).await),
        }

        self.session = Some(Session::Da(da_session));
        self.last_step = Step::Connected;
        info!("Connected to {} DA", da.da_type);
        Ok(())
    }

    async fn handshake(&self, brom: &mut BromSession) -> Result<()> {
        let delay = self.dialects.handshake_delay;
        for attempt in 1..=HANDSHAKE_RETRIES {
            match brom.handshake(delay).await {
                Ok(()) => return Ok(()),
                Err(Error::HandshakeTimeout) if attempt < HANDSHAKE_RETRIES => {
                    warn!("Handshake attempt {}/{} timed out, resetting link", attempt, HANDSHAKE_RETRIES);
                    brom.reset_link().await?;
                }
                Err(Error::HandshakeTimeout) => break,
                Err(e) => return Err(e),
            }
        }

        Err(Error::DeviceUnresponsive(format!("no handshake after {} attempts", HANDSHAKE_RETRIES)))
    }

    async fn abort_connect(&mut self, session: Session, e: Error) -> Error {
        let e = e.in_stage(session.stage(), self.last_step);
        error!("Connect failed: {}", e);
        self.park(session.into_connection()).await;
        e
    }

    /// Resets the link and keeps the connection for the next `connect`.
    async fn park(&mut self, mut conn: Connection) {
        if let Err(e) = conn.reset().await {
            warn!("Failed to reset port after teardown: {}", e);
        }
        conn.connection_type = conn.port.get_connection_type();
        self.conn = Some(conn);
        self.chip = None;
        self.last_step = Step::None;
    }

    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            info!("Tearing down {} session", session.stage());
            self.park(session.into_connection()).await;
        }
    }

    /// Wraps an operation result with stage context, tearing the session
    /// down on fatal errors.
    async fn finish<T>(&mut self, step: Step, res: Result<T>) -> Result<T> {
        match res {
            Ok(v) => {
                self.last_step = step;
                Ok(v)
            }
            Err(e) => {
                let e = e.in_stage(self.stage(), self.last_step);
                if e.is_fatal() {
                    error!("Fatal error, session dropped: {}", e);
                    self.teardown().await;
                } else if self.is_stranded() {
                    warn!("DA is stuck inside an aborted transfer, session dropped");
                    self.teardown().await;
                }
                Err(e)
            }
        }
    }

    fn is_stranded(&self) -> bool {
        matches!(&self.session, Some(Session::Da(da)) if da.is_stranded())
    }

    fn da_session(&mut self) -> Result<&mut DaSession> {
        let actual = self.stage();
        match &mut self.session {
            Some(Session::Da(da)) => Ok(da),
            _ => Err(Error::StateMismatch { expected: Stage::Da, actual }),
        }
    }

    /// Shuts the DA down (or reboots it) and releases the port.
    pub async fn disconnect(&mut self, reboot: bool) -> Result<()> {
        let mut res = Ok(());
        if let Some(Session::Da(da)) = &mut self.session
            && !da.is_stranded()
        {
            res = da.shutdown(reboot).await;
        }
        let res = self.finish(Step::Shutdown, res).await;

        if let Some(session) = self.session.take() {
            self.conn = Some(session.into_connection());
        }
        if let Some(conn) = &mut self.conn {
            if let Err(e) = conn.port.close().await {
                warn!("Failed to close port: {}", e);
            }
            conn.connection_type = conn.port.get_connection_type();
        }
        self.chip = None;
        self.last_step = Step::None;
        res
    }

    pub async fn storage_info(&mut self) -> Result<StorageInfo> {
        let res = self.da_session().and_then(|da| da.storage_info());
        self.finish(self.last_step, res).await
    }

    /// Queries the chip id again, through the DA when one runs.
    pub async fn refresh_chip_info(&mut self) -> Result<ChipInfo> {
        let res = match &mut self.session {
            Some(Session::Brom(brom)) => brom.identify().await,
            Some(Session::Preloader(preloader)) => preloader.identify().await,
            Some(Session::Da(da)) => da.identify().await,
            None => Err(Error::StateMismatch { expected: Stage::Brom, actual: Stage::Disconnected }),
        };
        let chip = self.finish(Step::Identify, res).await?;
        self.chip = Some(chip.clone());
        Ok(chip)
    }

    /// Reads `count` words of memory through the BROM or Preloader.
    pub async fn read32(&mut self, address: u32, count: u32) -> Result<Vec<u32>> {
        let actual = self.stage();
        let res = match &mut self.session {
            Some(Session::Brom(brom)) => brom.read32(address, count).await,
            Some(Session::Preloader(preloader)) => preloader.read32(address, count).await,
            _ => Err(Error::StateMismatch { expected: Stage::Brom, actual }),
        };
        self.finish(self.last_step, res).await
    }

    pub async fn usb_speed(&mut self) -> Result<u32> {
        let res = match self.da_session() {
            Ok(da) => da.usb_speed().await,
            Err(e) => Err(e),
        };
        self.finish(self.last_step, res).await
    }

    pub async fn list_partitions(&mut self) -> Result<PartitionTable> {
        let res = match self.da_session() {
            Ok(da) => da.read_partition_table().await.cloned(),
            Err(e) => Err(e),
        };
        self.finish(Step::PartitionTableRead, res).await
    }

    /// The raw partition table bytes (GPT probe area or PMT).
    pub async fn dump_partition_table(&mut self) -> Result<Vec<u8>> {
        let res = match self.da_session() {
            Ok(da) => da.dump_partition_table().await,
            Err(e) => Err(e),
        };
        self.finish(Step::PartitionTableRead, res).await
    }

    pub async fn read_partition(
        &mut self,
        name: &str,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Vec<u8>> {
        self.read_region(&StorageRegion::partition(name), None, progress).await
    }

    /// Reads `length` bytes from the start of `region`, or the whole region.
    pub async fn read_region(
        &mut self,
        region: &StorageRegion,
        length: Option<usize>,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<Vec<u8>> {
        let res = match self.da_session() {
            Ok(da) => da.read(region, length, progress).await,
            Err(e) => Err(e),
        };
        self.finish(Step::Read, res).await
    }

    pub async fn write_partition(
        &mut self,
        name: &str,
        data: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<WriteReport> {
        self.write_region(&StorageRegion::partition(name), data, progress).await
    }

    pub async fn write_region(
        &mut self,
        region: &StorageRegion,
        data: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<WriteReport> {
        let cancel = self.cancel.clone();
        let res = match self.da_session() {
            Ok(da) => da.write(region, data, &cancel, progress).await,
            Err(e) => Err(e),
        };
        cancel.reset();
        self.finish(Step::Write, res).await
    }

    pub async fn erase_partition(
        &mut self,
        name: &str,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()> {
        self.erase_region(&StorageRegion::partition(name), progress).await
    }

    pub async fn erase_region(
        &mut self,
        region: &StorageRegion,
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<()> {
        let cancel = self.cancel.clone();
        let res = match self.da_session() {
            Ok(da) => da.erase(region, &cancel, progress).await,
            Err(e) => Err(e),
        };
        cancel.reset();
        self.finish(Step::Erase, res).await
    }

    pub async fn verify_partition(
        &mut self,
        name: &str,
        expected: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<bool> {
        self.verify_region(&StorageRegion::partition(name), expected, progress).await
    }

    /// Compares the start of `region` against `expected`. Read errors are
    /// returned as such, never as a mismatch.
    pub async fn verify_region(
        &mut self,
        region: &StorageRegion,
        expected: &[u8],
        progress: &mut (dyn FnMut(usize, usize) + Send),
    ) -> Result<bool> {
        let res = match self.da_session() {
            Ok(da) => da.verify(region, expected, progress).await,
            Err(e) => Err(e),
        };
        self.finish(Step::Verify, res).await
    }

    /// Which boot stage answered, once identified.
    pub fn boot_stage(&self) -> Option<BootStage> {
        self.chip.as_ref().map(|chip| chip.boot_stage)
    }
}
