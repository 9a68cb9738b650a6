/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
use log::debug;

use crate::core::chipinfo::ChipInfo;
use crate::da::{DA, DAEntryRegion, DAType, ImageProvider, PayloadImage};
use crate::error::{Error, Result};
use crate::{le_u16, le_u32};

const HEADER_LEN: usize = 0x6C;
const LEGACY_ENTRY_LEN: usize = 0xD8;
const ENTRY_LEN: usize = 0xDC;
const REGION_HEADER_LEN: usize = 20;

/// Represents a Download Agent (DA) file containing multiple DA entries
#[derive(Debug, Clone)]
pub struct DAFile {
    pub da_type: DAType,
    /// Identifier string from the file header
    pub da_id: String,
    /// List of DA entries for different SoCs
    pub das: Vec<DA>,
}

impl DAFile {
    pub fn parse_da(raw_data: &[u8]) -> Result<DAFile> {
        if raw_data.len() < HEADER_LEN + ENTRY_LEN {
            return Err(Error::proto("Invalid DA file, too small"));
        }

        let hdr = &raw_data[..HEADER_LEN];

        let legacy_test_pos = HEADER_LEN + LEGACY_ENTRY_LEN;
        let da_type = if &raw_data[legacy_test_pos..legacy_test_pos + 2] == b"\xDA\xDA" {
            DAType::Legacy
        } else if hdr.windows(9).any(|w| w == b"MTK_DA_v6") {
            DAType::V6
        } else {
            DAType::V5
        };

        if da_type != DAType::Legacy && !hdr.windows(0x12).any(|w| w == b"MTK_DOWNLOAD_AGENT") {
            return Err(Error::proto("Invalid DA file: Missing MTK_DOWNLOAD_AGENT signature"));
        }

        let da_id = String::from_utf8_lossy(&hdr[0x20..0x60]).trim_end_matches('\0').to_string();
        let num_socs = le_u32!(hdr, 0x68) as usize;

        let da_entry_size = match da_type {
            DAType::Legacy => LEGACY_ENTRY_LEN,
            _ => ENTRY_LEN,
        };

        if HEADER_LEN + num_socs * da_entry_size > raw_data.len() {
            return Err(Error::proto(format!("Invalid DA file: {} entries do not fit", num_socs)));
        }

        let mut das = Vec::with_capacity(num_socs);
        for i in 0..num_socs {
            let start = HEADER_LEN + i * da_entry_size;
            let da_entry = &raw_data[start..start + da_entry_size];
            das.push(Self::parse_entry(raw_data, da_entry, da_type)?);
        }

        debug!("Parsed DA file '{}' ({}, {} entries)", da_id, da_type, das.len());
        Ok(DAFile { da_type, da_id, das })
    }

    // Structure of the DA header entry
    // 0x00	magic	u16
    // 0x02	hw_code	u16
    // 0x04	hw_sub_code	u16
    // 0x06	hw_version	u16
    // 0x08	sw_version	u16 (v5 and v6 only, 0 in legacy)
    // 0x0C	pagesize	u16
    // 0x10	entry_region_index	u16
    // 0x12	entry_region_count	u16
    // 0x14	region table starts, 20 bytes per region:
    //      offset u32 | length u32 | addr u32 | length - sig_len u32 | sig_len u32
    fn parse_entry(raw_data: &[u8], da_entry: &[u8], file_type: DAType) -> Result<DA> {
        let hw_code = le_u16!(da_entry, 0x02);
        let hw_sub_code = le_u16!(da_entry, 0x04);
        let region_count = le_u16!(da_entry, 0x12) as usize;

        if 0x14 + region_count * REGION_HEADER_LEN > da_entry.len() {
            return Err(Error::proto(format!(
                "DA entry 0x{:04X} declares {} regions",
                hw_code, region_count
            )));
        }

        let mut da_type = file_type;
        let mut regions = Vec::with_capacity(region_count);
        for r in 0..region_count {
            let region_header = &da_entry[0x14 + r * REGION_HEADER_LEN..];
            let offset = le_u32!(region_header, 0x00) as usize;
            let length = le_u32!(region_header, 0x04) as usize;
            let addr = le_u32!(region_header, 0x08);
            let sig_len = le_u32!(region_header, 0x10);

            let data = raw_data
                .get(offset..offset.saturating_add(length))
                .ok_or_else(|| {
                    Error::proto(format!(
                        "DA region at 0x{:08X}+0x{:X} is outside the file",
                        offset, length
                    ))
                })?
                .to_vec();

            if sig_len as usize > length {
                return Err(Error::proto("DA region signature is longer than the region"));
            }

            debug!(
                "Region: offset={:08X}, length={:08X}, addr={:08X}, sig_len={:08X}",
                offset, length, addr, sig_len
            );

            // Some "V5" files carry legacy DAs
            if da_type != DAType::Legacy
                && data.windows(b"AND_SECRO_v".len()).any(|w| w == b"AND_SECRO_v")
            {
                da_type = DAType::Legacy;
            }

            regions.push(DAEntryRegion::new(data, addr, sig_len));
        }

        // Region 0 only carries file info, the loadable stages follow it
        if !regions.is_empty() {
            regions.remove(0);
        }

        debug!(
            "Parsed DA entry: hw_code={:04X}, hw_sub_code={:04X}, stages={}",
            hw_code,
            hw_sub_code,
            regions.len()
        );

        Ok(DA { da_type, regions, hw_code, hw_sub_code })
    }

    pub fn get_da_from_hw_code(&self, hw_code: u16) -> Option<DA> {
        let da_code = da_code_for(hw_code);
        self.das.iter().find(|da| da.hw_code == da_code || da.hw_code == hw_code).cloned()
    }
}

impl ImageProvider for DAFile {
    fn payload(&self, _chip: &ChipInfo) -> Option<PayloadImage> {
        None
    }

    fn download_agent(&self, chip: &ChipInfo) -> Option<DA> {
        self.get_da_from_hw_code(chip.hw_code)
    }
}

/// XFlash DA files are indexed by the SoC's commercial name rather than
/// the hardware code the ROM reports.
fn da_code_for(hw_code: u16) -> u16 {
    match hw_code {
        0x279 => 0x6797,
        0x321 => 0x6735,
        0x326 => 0x6755,
        0x335 => 0x6735,
        0x337 => 0x6735,
        0x507 => 0x6758,
        0x551 => 0x6757,
        0x562 => 0x6799,
        0x601 => 0x6755,
        0x633 => 0x6570,
        0x688 => 0x6758,
        0x690 => 0x6763,
        0x699 => 0x6739,
        0x707 => 0x6768,
        0x717 => 0x6761,
        0x725 => 0x6779,
        0x766 => 0x6765,
        0x788 => 0x6771,
        0x813 => 0x6785,
        0x816 => 0x6885,
        0x886 => 0x6873,
        0x908 => 0x8696,
        0x930 => 0x8195,
        0x950 => 0x6893,
        0x959 => 0x6877,
        0x989 => 0x6833,
        0x996 => 0x6853,
        0x1066 => 0x6781,
        0x6583 => 0x6589,
        0x8172 => 0x8173,
        0x8176 => 0x8173,
        _ => hw_code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // One V5 entry for MT6768 with a file info region and two stages.
    fn v5_file() -> Vec<u8> {
        let mut file = vec![0u8; HEADER_LEN + ENTRY_LEN];
        file[..0x12].copy_from_slice(b"MTK_DOWNLOAD_AGENT");
        file[0x20..0x27].copy_from_slice(b"TEST_DA");
        file[0x68..0x6C].copy_from_slice(&1u32.to_le_bytes());

        let stages: [(&[u8], u32, u32); 3] =
            [(b"INFO", 0, 0), (b"DA1-CODE-SIG!", 0x200000, 4), (b"DA2-CODE", 0x40000000, 0)];

        let entry = HEADER_LEN;
        file[entry..entry + 2].copy_from_slice(&0xDADAu16.to_le_bytes());
        file[entry + 2..entry + 4].copy_from_slice(&0x6768u16.to_le_bytes());
        file[entry + 0x12..entry + 0x14].copy_from_slice(&3u16.to_le_bytes());

        for (i, (data, addr, sig_len)) in stages.iter().enumerate() {
            let offset = file.len() as u32;
            let r = entry + 0x14 + i * REGION_HEADER_LEN;
            file[r..r + 4].copy_from_slice(&offset.to_le_bytes());
            file[r + 4..r + 8].copy_from_slice(&(data.len() as u32).to_le_bytes());
            file[r + 8..r + 12].copy_from_slice(&addr.to_le_bytes());
            file[r + 12..r + 16].copy_from_slice(&(data.len() as u32 - sig_len).to_le_bytes());
            file[r + 16..r + 20].copy_from_slice(&sig_len.to_le_bytes());
            file.extend_from_slice(data);
        }

        file
    }

    #[test]
    fn parses_v5_entry_and_drops_file_info() {
        let file = DAFile::parse_da(&v5_file()).unwrap();
        assert_eq!(file.da_type, DAType::V5);
        assert_eq!(file.da_id, "TEST_DA");

        let da = file.get_da_from_hw_code(0x707).unwrap();
        assert_eq!(da.regions.len(), 2);

        let da1 = da.get_da1().unwrap();
        assert_eq!(da1.addr, 0x200000);
        assert_eq!(da1.unsigned_data(), b"DA1-CODE-");
        assert_eq!(da.get_da2().unwrap().data, b"DA2-CODE");
    }

    #[test]
    fn unknown_hw_code_has_no_da() {
        let file = DAFile::parse_da(&v5_file()).unwrap();
        assert!(file.get_da_from_hw_code(0x0950).is_none());
    }

    #[test]
    fn regions_outside_the_file_are_rejected() {
        let mut raw = v5_file();
        raw.truncate(raw.len() - 4);
        assert!(DAFile::parse_da(&raw).is_err());
    }

    #[test]
    fn missing_signature_is_rejected() {
        let mut raw = v5_file();
        raw[0] = b'X';
        assert!(DAFile::parse_da(&raw).is_err());
    }
}
