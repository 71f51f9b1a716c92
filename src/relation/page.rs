pub const PAGE_HEADER_SIZE: usize = 24;

const LAYOUT_VERSION: u16 = 4;
const VALID_FLAGS: u16 = 7;
const CHECKSUM_OFFSET: usize = 8;

const N_SUMS: usize = 32;
const FNV_PRIME: u32 = 16_777_619;
const CHECKSUM_BASE_OFFSETS: [u32; N_SUMS] = [
    0x5B1F_36E9, 0xB852_5960, 0x02AB_50AA, 0x1DE6_6D2A, 0x79FF_467A, 0x9BB9_F8A3, 0x217E_7CD2,
    0x83E1_3D2C, 0xF8D4_474F, 0xE39E_B970, 0x42C6_AE16, 0x9932_16FA, 0x7B09_3B5D, 0x98DA_FF3C,
    0xF718_902A, 0x0B1C_9CDB, 0xE58F_764B, 0x1876_36BC, 0x5D7B_3BB1, 0xE73D_E7DE, 0x92BE_C979,
    0xCCA6_C0B2, 0x304A_0979, 0x85AA_43D4, 0x7831_25BB, 0x6CA8_EAA2, 0xE407_EAC6, 0x4B5C_FC3E,
    0x9FBF_8C76, 0x15CA_20BE, 0xF2CA_9FD3, 0x959B_D756,
];

/// The fixed header at the start of every heap or index page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageHeader {
    pub lsn_high: u32,
    pub lsn_low: u32,
    pub checksum: u16,
    pub flags: u16,
    pub lower: u16,
    pub upper: u16,
    pub special: u16,
    pub page_size_version: u16,
    pub prune_xid: u32,
}

impl PageHeader {
    pub fn parse(page: &[u8]) -> Option<Self> {
        let header = page.get(..PAGE_HEADER_SIZE)?;
        let u16_at = |offset: usize| u16::from_le_bytes([header[offset], header[offset + 1]]);
        let u32_at = |offset: usize| {
            u32::from_le_bytes([
                header[offset],
                header[offset + 1],
                header[offset + 2],
                header[offset + 3],
            ])
        };

        Some(PageHeader {
            lsn_high: u32_at(0),
            lsn_low: u32_at(4),
            checksum: u16_at(8),
            flags: u16_at(10),
            lower: u16_at(12),
            upper: u16_at(14),
            special: u16_at(16),
            page_size_version: u16_at(18),
            prune_xid: u32_at(20),
        })
    }

    pub fn lsn(&self) -> u64 {
        (u64::from(self.lsn_high) << 32) | u64::from(self.lsn_low)
    }

    pub fn is_new(&self) -> bool {
        self.upper == 0
    }

    pub fn page_size(&self) -> u32 {
        u32::from(self.page_size_version & 0xFF00)
    }

    pub fn layout_version(&self) -> u16 {
        self.page_size_version & 0x00FF
    }

    pub fn is_valid(&self, block_size: u32) -> bool {
        let header_size = PAGE_HEADER_SIZE as u16;
        self.flags & !VALID_FLAGS == 0
            && self.lower >= header_size
            && self.lower <= self.upper
            && self.upper <= self.special
            && u32::from(self.special) <= block_size
            && self.page_size() == block_size & 0xFF00
            && self.layout_version() == LAYOUT_VERSION
    }
}

fn checksum_comp(checksum: u32, value: u32) -> u32 {
    let tmp = checksum ^ value;
    tmp.wrapping_mul(FNV_PRIME) ^ (tmp >> 17)
}

/// Page checksum as stored in `pd_checksum`, for the page at absolute
/// block number `block_no` of its relation.
pub fn page_checksum(page: &[u8], block_no: u32) -> u16 {
    let mut sums = CHECKSUM_BASE_OFFSETS;
    let words = page.chunks_exact(4).enumerate().map(|(index, word)| {
        let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        let byte_offset = index * 4;
        if byte_offset == CHECKSUM_OFFSET {
            // pd_checksum is the low half of this word
            word & 0xFFFF_0000
        } else {
            word
        }
    });

    for (index, word) in words.enumerate() {
        let lane = index % N_SUMS;
        sums[lane] = checksum_comp(sums[lane], word);
    }

    for _ in 0..2 {
        for sum in &mut sums {
            *sum = checksum_comp(*sum, 0);
        }
    }

    let checksum = sums.iter().fold(0, |acc, sum| acc ^ sum) ^ block_no;
    u16::try_from(checksum % 65535 + 1).unwrap_or(u16::MAX)
}
