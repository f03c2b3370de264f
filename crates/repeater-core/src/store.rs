//! Versioned persistence of the config record and the blob store.
//!
//! Flash layout:
//!
//! ```text
//! sector 0x0c        config record: magic (u32 LE) | length (u16 LE) | body
//! sector 0x0d + id   blob slot `id`, one sector each
//! ```
//!
//! A stored record is only accepted when both magic and length match the
//! current schema. Anything else yields the compiled defaults.

use std::net::Ipv4Addr;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::addr::MacAddr;
use crate::config::{ConfigRecord, DhcpLease, MAX_DHCP};
use crate::fixed::FixedStr;
use crate::flash::{Flash, FlashError, SECTOR_SIZE};

pub const MAGIC_NUMBER: u32 = 0x1524_35fc;
pub const CONFIG_SECTOR: u32 = 0x0c;
pub const BLOB_BASE_SECTOR: u32 = CONFIG_SECTOR + 1;
pub const MAX_BLOBS: u8 = 4;

/// Smallest flash image that holds the record and every blob slot.
pub const REQUIRED_SECTORS: u32 = BLOB_BASE_SECTOR + MAX_BLOBS as u32;

const HEADER_LEN: usize = 6;

const BODY_LEN: usize = (32 + 64 + 1 + 6 + 32)       // station
    + (32 + 64 + 1 + 1 + 1 + 1)                      // access point
    + (1 + 64 + 64 + 32)                             // peap
    + (64 + 1)                                       // lock
    + (4 + 4)                                        // watchdogs
    + (1 + 4 * 5)                                    // addressing
    + (2 * 4 + 4 * 2 + 2 * 2 + 1 + 1)                // system
    + (32 + 2 + 32 + 32 + 32 + 64 + 64 + 64)         // telemetry
    + (6 + 6)                                        // macs
    + (1 + 4 * 3 + 6)                                // ethernet
    + (2 + MAX_DHCP * (6 + 4)); // dhcp leases

/// Full encoded size, header included. Stored in the header's length field.
pub const RECORD_LEN: usize = HEADER_LEN + BODY_LEN;

/// Identifier of a blob slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobId(pub u8);

/// The port-map table lives in the first slot.
pub const PORTMAP_BLOB: BlobId = BlobId(0);

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Flash(#[from] FlashError),

    #[error("blob id {0} out of range")]
    NoSuchBlob(u8),

    #[error("blob of {len} bytes does not fit a {max} byte slot")]
    BlobTooLarge { len: usize, max: usize },
}

/// Config record and blob persistence over a [`Flash`].
pub struct ConfigStore<F> {
    flash: F,
}

impl<F: Flash> ConfigStore<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }

    /// Load the record. The flag is false when the defaults were used.
    pub fn load(&mut self) -> (ConfigRecord, bool) {
        let mut buf = vec![0u8; RECORD_LEN];
        if let Err(e) = self.flash.read(CONFIG_SECTOR * SECTOR_SIZE, &mut buf) {
            warn!("Config read failed, using defaults: {}", e);
            return (ConfigRecord::defaults(), false);
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let len = u16::from_le_bytes([buf[4], buf[5]]) as usize;
        if magic != MAGIC_NUMBER || len != RECORD_LEN {
            info!(
                "No valid config (magic {:#010x}, length {}), using defaults",
                magic, len
            );
            return (ConfigRecord::defaults(), false);
        }

        match decode_body(&buf[HEADER_LEN..]) {
            Some(config) => {
                debug!("Config loaded ({} bytes)", RECORD_LEN);
                (config, true)
            }
            None => {
                warn!("Config body malformed, using defaults");
                (ConfigRecord::defaults(), false)
            }
        }
    }

    /// Erase the config sector and write the whole record once.
    pub fn save(&mut self, config: &ConfigRecord) -> Result<(), StoreError> {
        let bytes = encode(config);
        self.flash.erase_sector(CONFIG_SECTOR)?;
        self.flash.write(CONFIG_SECTOR * SECTOR_SIZE, &bytes)?;
        debug!("Config saved");
        Ok(())
    }

    pub fn blob_save(&mut self, id: BlobId, data: &[u8]) -> Result<(), StoreError> {
        let sector = Self::blob_sector(id, data.len())?;
        self.flash.erase_sector(sector)?;
        self.flash.write(sector * SECTOR_SIZE, data)?;
        Ok(())
    }

    pub fn blob_load(&mut self, id: BlobId, len: usize) -> Result<Vec<u8>, StoreError> {
        let sector = Self::blob_sector(id, len)?;
        let mut buf = vec![0u8; len];
        self.flash.read(sector * SECTOR_SIZE, &mut buf)?;
        Ok(buf)
    }

    /// Overwrite the first `len` bytes of a slot with zeros.
    pub fn blob_zero(&mut self, id: BlobId, len: usize) -> Result<(), StoreError> {
        self.blob_save(id, &vec![0u8; len])
    }

    fn blob_sector(id: BlobId, len: usize) -> Result<u32, StoreError> {
        if id.0 >= MAX_BLOBS {
            return Err(StoreError::NoSuchBlob(id.0));
        }
        if len > SECTOR_SIZE as usize {
            return Err(StoreError::BlobTooLarge {
                len,
                max: SECTOR_SIZE as usize,
            });
        }
        Ok(BLOB_BASE_SECTOR + u32::from(id.0))
    }
}

// ============================================================================
// Record codec
// ============================================================================

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }
    fn bool(&mut self, v: bool) {
        self.buf.push(u8::from(v));
    }
    fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn i32(&mut self, v: i32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }
    fn ip(&mut self, v: Ipv4Addr) {
        self.buf.extend_from_slice(&v.octets());
    }
    fn mac(&mut self, v: MacAddr) {
        self.buf.extend_from_slice(&v.0);
    }
    fn str<const N: usize>(&mut self, v: &FixedStr<N>) {
        self.buf.extend_from_slice(v.raw());
    }
}

struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take<const N: usize>(&mut self) -> Option<[u8; N]> {
        if self.buf.len() < N {
            return None;
        }
        let (head, rest) = self.buf.split_at(N);
        self.buf = rest;
        head.try_into().ok()
    }
    fn u8(&mut self) -> Option<u8> {
        self.take::<1>().map(|b| b[0])
    }
    fn bool(&mut self) -> Option<bool> {
        self.u8().map(|b| b != 0)
    }
    fn u16(&mut self) -> Option<u16> {
        self.take().map(u16::from_le_bytes)
    }
    fn i32(&mut self) -> Option<i32> {
        self.take().map(i32::from_le_bytes)
    }
    fn ip(&mut self) -> Option<Ipv4Addr> {
        self.take::<4>().map(Ipv4Addr::from)
    }
    fn mac(&mut self) -> Option<MacAddr> {
        self.take().map(MacAddr)
    }
    fn str<const N: usize>(&mut self) -> Option<FixedStr<N>> {
        self.take::<N>().map(|raw| FixedStr::from_raw(&raw))
    }
}

/// Encode header and body.
pub fn encode(c: &ConfigRecord) -> Vec<u8> {
    let mut w = Writer {
        buf: Vec::with_capacity(RECORD_LEN),
    };
    w.buf.extend_from_slice(&MAGIC_NUMBER.to_le_bytes());
    w.u16(RECORD_LEN as u16);

    w.str(&c.ssid);
    w.str(&c.password);
    w.bool(c.auto_connect);
    w.mac(c.bssid);
    w.str(&c.sta_hostname);

    w.str(&c.ap_ssid);
    w.str(&c.ap_password);
    w.bool(c.ap_open);
    w.bool(c.ap_on);
    w.bool(c.ssid_hidden);
    w.u8(c.max_clients);

    w.bool(c.use_peap);
    w.str(&c.peap_identity);
    w.str(&c.peap_username);
    w.str(&c.peap_password);

    w.str(&c.lock_password);
    w.bool(c.locked);

    w.i32(c.ap_watchdog);
    w.i32(c.client_watchdog);

    w.bool(c.nat_enable);
    w.ip(c.network_addr);
    w.ip(c.dns_addr);
    w.ip(c.my_addr);
    w.ip(c.my_netmask);
    w.ip(c.my_gw);

    w.u16(c.phy_mode);
    w.u16(c.clock_speed);
    w.u16(c.status_led);
    w.u16(c.hw_reset);
    w.i32(c.vmin);
    w.i32(c.vmin_sleep);
    w.u16(c.config_port);
    w.u16(c.web_port);
    w.u8(c.config_access);
    w.u8(c.gpio_out_status);

    w.str(&c.mqtt_host);
    w.u16(c.mqtt_port);
    w.str(&c.mqtt_user);
    w.str(&c.mqtt_password);
    w.str(&c.mqtt_id);
    w.str(&c.mqtt_prefix);
    w.str(&c.mqtt_pub_topic);
    w.str(&c.mqtt_sub_topic);

    w.mac(c.ap_mac);
    w.mac(c.sta_mac);

    w.bool(c.eth_enable);
    w.ip(c.eth_addr);
    w.ip(c.eth_netmask);
    w.ip(c.eth_gw);
    w.mac(c.eth_mac);

    let leases = &c.dhcp_leases[..c.dhcp_leases.len().min(MAX_DHCP)];
    w.u16(leases.len() as u16);
    for slot in 0..MAX_DHCP {
        match leases.get(slot) {
            Some(lease) => {
                w.mac(lease.mac);
                w.ip(lease.ip);
            }
            None => w.buf.extend_from_slice(&[0u8; 10]),
        }
    }

    w.buf
}

fn decode_body(body: &[u8]) -> Option<ConfigRecord> {
    let mut r = Reader { buf: body };
    let mut c = ConfigRecord {
        ssid: r.str()?,
        password: r.str()?,
        auto_connect: r.bool()?,
        bssid: r.mac()?,
        sta_hostname: r.str()?,

        ap_ssid: r.str()?,
        ap_password: r.str()?,
        ap_open: r.bool()?,
        ap_on: r.bool()?,
        ssid_hidden: r.bool()?,
        max_clients: r.u8()?,

        use_peap: r.bool()?,
        peap_identity: r.str()?,
        peap_username: r.str()?,
        peap_password: r.str()?,

        lock_password: r.str()?,
        locked: r.bool()?,

        ap_watchdog: r.i32()?,
        client_watchdog: r.i32()?,

        nat_enable: r.bool()?,
        network_addr: r.ip()?,
        dns_addr: r.ip()?,
        my_addr: r.ip()?,
        my_netmask: r.ip()?,
        my_gw: r.ip()?,

        phy_mode: r.u16()?,
        clock_speed: r.u16()?,
        status_led: r.u16()?,
        hw_reset: r.u16()?,
        vmin: r.i32()?,
        vmin_sleep: r.i32()?,
        config_port: r.u16()?,
        web_port: r.u16()?,
        config_access: r.u8()?,
        gpio_out_status: r.u8()?,

        mqtt_host: r.str()?,
        mqtt_port: r.u16()?,
        mqtt_user: r.str()?,
        mqtt_password: r.str()?,
        mqtt_id: r.str()?,
        mqtt_prefix: r.str()?,
        mqtt_pub_topic: r.str()?,
        mqtt_sub_topic: r.str()?,

        ap_mac: r.mac()?,
        sta_mac: r.mac()?,

        eth_enable: r.bool()?,
        eth_addr: r.ip()?,
        eth_netmask: r.ip()?,
        eth_gw: r.ip()?,
        eth_mac: r.mac()?,

        dhcp_leases: Vec::new(),
    };

    let count = usize::from(r.u16()?);
    if count > MAX_DHCP {
        return None;
    }
    for slot in 0..MAX_DHCP {
        let mac = r.mac()?;
        let ip = r.ip()?;
        if slot < count {
            c.dhcp_leases.push(DhcpLease { mac, ip });
        }
    }
    Some(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::MemoryFlash;
    use pretty_assertions::assert_eq;

    fn store() -> ConfigStore<MemoryFlash> {
        ConfigStore::new(MemoryFlash::new(REQUIRED_SECTORS))
    }

    fn customized() -> ConfigRecord {
        let mut c = ConfigRecord::defaults();
        c.ssid = FixedStr::truncated(b"uplink");
        c.password = FixedStr::truncated(&[0xff, b' ', b'x']);
        c.auto_connect = true;
        c.bssid = MacAddr([1, 2, 3, 4, 5, 6]);
        c.locked = true;
        c.lock_password = FixedStr::truncated(b"pw1");
        c.ap_watchdog = 45;
        c.client_watchdog = -1;
        c.network_addr = Ipv4Addr::new(10, 24, 1, 0);
        c.vmin = 2900;
        c.sta_mac = MacAddr::RANDOM;
        c.mqtt_host = FixedStr::truncated(b"broker.local");
        c.dhcp_leases = vec![
            DhcpLease {
                mac: MacAddr([0xaa; 6]),
                ip: Ipv4Addr::new(10, 24, 1, 7),
            },
            DhcpLease {
                mac: MacAddr([0xbb; 6]),
                ip: Ipv4Addr::new(10, 24, 1, 9),
            },
        ];
        c
    }

    #[test]
    fn test_encoded_length_matches_header() {
        assert_eq!(encode(&ConfigRecord::defaults()).len(), RECORD_LEN);
        assert!(RECORD_LEN <= SECTOR_SIZE as usize);
        assert!(RECORD_LEN <= u16::MAX as usize);
    }

    #[test]
    fn test_erased_flash_yields_defaults() {
        let mut store = store();
        let (config, valid) = store.load();
        assert!(!valid);
        assert_eq!(config, ConfigRecord::defaults());
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut store = store();
        let cfg = customized();
        store.save(&cfg).unwrap();
        let (loaded, valid) = store.load();
        assert!(valid);
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn test_save_twice_replaces_whole_record() {
        let mut store = store();
        store.save(&customized()).unwrap();
        let defaults = ConfigRecord::defaults();
        store.save(&defaults).unwrap();
        assert_eq!(store.load(), (defaults, true));
    }

    #[test]
    fn test_corrupted_magic_yields_defaults() {
        for garbage in [0x00u8, 0x5a, 0xff] {
            let mut store = store();
            store.save(&customized()).unwrap();
            let base = CONFIG_SECTOR * SECTOR_SIZE;
            store.flash_mut().poke(base, &[0xde, 0xad, 0xbe, 0xef]);
            store
                .flash_mut()
                .poke(base + HEADER_LEN as u32, &[garbage; 64]);
            assert_eq!(store.load(), (ConfigRecord::defaults(), false));
        }
    }

    #[test]
    fn test_length_mismatch_yields_defaults() {
        let mut store = store();
        store.save(&customized()).unwrap();
        let base = CONFIG_SECTOR * SECTOR_SIZE;
        store
            .flash_mut()
            .poke(base + 4, &((RECORD_LEN - 1) as u16).to_le_bytes());
        assert_eq!(store.load(), (ConfigRecord::defaults(), false));
    }

    #[test]
    fn test_failed_save_is_reported() {
        let mut store = store();
        store.flash_mut().set_fail_writes(true);
        assert!(store.save(&customized()).is_err());
        store.flash_mut().set_fail_writes(false);
        assert!(!store.load().1);
    }

    #[test]
    fn test_blob_slots_are_independent() {
        let mut store = store();
        store.blob_save(BlobId(0), &[1, 2, 3, 4]).unwrap();
        store.blob_save(BlobId(1), &[9; 8]).unwrap();
        assert_eq!(store.blob_load(BlobId(0), 4).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(store.blob_load(BlobId(1), 8).unwrap(), vec![9; 8]);

        store.blob_zero(BlobId(0), 4).unwrap();
        assert_eq!(store.blob_load(BlobId(0), 4).unwrap(), vec![0; 4]);
        assert_eq!(store.blob_load(BlobId(1), 8).unwrap(), vec![9; 8]);
    }

    #[test]
    fn test_blob_rewrite_replaces_full_slot() {
        let mut store = store();
        store.blob_save(BlobId(2), &[0x00; 16]).unwrap();
        store.blob_save(BlobId(2), &[0x55; 4]).unwrap();
        let mut expected = vec![0x55; 4];
        expected.extend_from_slice(&[0xff; 12]);
        assert_eq!(store.blob_load(BlobId(2), 16).unwrap(), expected);
    }

    #[test]
    fn test_blob_bounds() {
        let mut store = store();
        assert!(matches!(
            store.blob_save(BlobId(MAX_BLOBS), &[0]),
            Err(StoreError::NoSuchBlob(_))
        ));
        assert!(matches!(
            store.blob_save(BlobId(0), &vec![0; SECTOR_SIZE as usize + 1]),
            Err(StoreError::BlobTooLarge { .. })
        ));
    }

    #[test]
    fn test_blob_does_not_touch_config() {
        let mut store = store();
        let cfg = customized();
        store.save(&cfg).unwrap();
        store.blob_zero(PORTMAP_BLOB, 512).unwrap();
        assert_eq!(store.load(), (cfg, true));
    }
}
