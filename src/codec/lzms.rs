//! State shared between the LZMS compressor and decompressor: the global
//! position/length slot-base tables, the x86 machine-code filter, and the
//! recent-offset LRU queues.

use once_cell::sync::Lazy;

/// Number of position slots, and index of the position sentinel.
pub const MAX_NUM_OFFSET_SYMS: usize = 799;

/// Number of length slots, and index of the length sentinel.
pub const NUM_LEN_SYMS: usize = 54;

/// Explicit recent-offset slots in each LRU queue.
pub const NUM_RECENT_OFFSETS: usize = 3;

const X86_MAX_TRANSLATION_OFFSET: i32 = 1023;
const X86_MAX_GOOD_TARGET_OFFSET: i32 = 65535;

/// Length of the scratch array [`x86_filter`] requires.
pub const X86_TARGET_WINDOW: usize = 65536;

/// No closed-form mapping from slot to base value is known; the increase
/// from one base to the next is a run of an increasing power of two, so
/// the tables are stored run-length encoded by delta.
static POSITION_SLOT_DELTA_RUN_LENS: [u8; 21] = [
    9, 0, 9, 7, 10, 15, 15, 20, 20, 30, 33, 40, 42, 45, 60, 73, 80, 85, 95, 105, 6,
];

static LENGTH_SLOT_DELTA_RUN_LENS: [u8; 17] =
    [27, 4, 6, 4, 5, 2, 1, 1, 1, 1, 1, 0, 0, 0, 0, 0, 1];

fn decode_delta_rle_slot_bases(slot_bases: &mut [u32], delta_run_lens: &[u8]) {
    let mut delta: u32 = 1;
    let mut base: u32 = 0;
    let mut slot = 0;
    for &run_len in delta_run_lens {
        for _ in 0..run_len {
            base += delta;
            slot_bases[slot] = base;
            slot += 1;
        }
        delta <<= 1;
    }
}

struct SlotBases {
    position: [u32; MAX_NUM_OFFSET_SYMS + 1],
    length: [u32; NUM_LEN_SYMS + 1],
}

static SLOT_BASES: Lazy<SlotBases> = Lazy::new(|| {
    let mut bases = SlotBases {
        position: [0; MAX_NUM_OFFSET_SYMS + 1],
        length: [0; NUM_LEN_SYMS + 1],
    };
    decode_delta_rle_slot_bases(&mut bases.position, &POSITION_SLOT_DELTA_RUN_LENS);
    bases.position[MAX_NUM_OFFSET_SYMS] = 0x7fff_ffff;
    decode_delta_rle_slot_bases(&mut bases.length, &LENGTH_SLOT_DELTA_RUN_LENS);
    bases.length[NUM_LEN_SYMS] = 0x4001_08ab;
    bases
});

/// The table mapping position slots to their base values, computed once
/// per process on first use. The final entry is a sentinel, not a slot.
pub fn position_slot_base() -> &'static [u32; MAX_NUM_OFFSET_SYMS + 1] {
    &SLOT_BASES.position
}

/// The table mapping length slots to their base values, computed once per
/// process on first use. The final entry is a sentinel, not a slot.
pub fn length_slot_base() -> &'static [u32; NUM_LEN_SYMS + 1] {
    &SLOT_BASES.length
}

/// Return the slot whose value range contains `value`: the largest `s`
/// with `slot_base_tab[s] <= value`. The tables are monotonic, so a
/// binary search would give the same answer.
pub fn get_slot(value: u32, slot_base_tab: &[u32]) -> usize {
    let mut slot = 0;
    while slot_base_tab[slot + 1] <= value {
        slot += 1;
    }
    slot
}

/// Classify the bytes at `p` as the start of an x86 instruction form the
/// filter translates. Returns the operand offset in bytes and the maximum
/// translation distance (zero for untranslatable bytes, in which case the
/// operand offset is just how far to advance).
fn may_x86_translate(p: &[u8]) -> (i32, i32) {
    match p[0] {
        0x48 => {
            if p[1] == 0x8b {
                if p[2] == 0x5 || p[2] == 0xd {
                    // Load relative (x86_64)
                    return (3, X86_MAX_TRANSLATION_OFFSET);
                }
            } else if p[1] == 0x8d && (p[2] & 0x7) == 0x5 {
                // Load effective address relative (x86_64)
                return (3, X86_MAX_TRANSLATION_OFFSET);
            }
        }
        0x4c => {
            if p[1] == 0x8d && (p[2] & 0x7) == 0x5 {
                // Load effective address relative (x86_64)
                return (3, X86_MAX_TRANSLATION_OFFSET);
            }
        }
        0xe8 => {
            // Call relative
            return (1, X86_MAX_TRANSLATION_OFFSET / 2);
        }
        0xe9 => {
            // Jump relative: skipped, not translated
            return (5, 0);
        }
        0xf0 => {
            if p[1] == 0x83 && p[2] == 0x05 {
                // Lock add relative
                return (3, X86_MAX_TRANSLATION_OFFSET);
            }
        }
        0xff => {
            if p[1] == 0x15 {
                // Call indirect
                return (2, X86_MAX_TRANSLATION_OFFSET);
            }
        }
        _ => {}
    }
    (1, 0)
}

fn read_le16(data: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([data[pos], data[pos + 1]])
}

fn read_le32(data: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
}

fn write_le32(data: &mut [u8], pos: usize, value: u32) {
    data[pos..pos + 4].copy_from_slice(&value.to_le_bytes());
}

/// Translate the relative addresses embedded in x86 instructions into
/// absolute form (`undo == false`), or back (`undo == true`). Applying
/// the filter twice with `undo` toggled restores the input exactly.
///
/// `last_target_usages` is caller-owned scratch of
/// [`X86_TARGET_WINDOW`] entries; its contents on entry are irrelevant.
pub fn x86_filter(data: &mut [u8], last_target_usages: &mut [i32], undo: bool) {
    assert_eq!(last_target_usages.len(), X86_TARGET_WINDOW);

    let mut closest_target_usage: i32 = -X86_MAX_TRANSLATION_OFFSET - 1;
    for usage in last_target_usages.iter_mut() {
        *usage = -X86_MAX_GOOD_TARGET_OFFSET - 1;
    }

    let size = data.len() as i32;
    let mut i: i32 = 0;
    while i < size - 11 {
        let (num_op_bytes, max_trans_offset) = may_x86_translate(&data[i as usize..]);
        if max_trans_offset == 0 {
            i += num_op_bytes;
            continue;
        }

        let operand_pos = (i + num_op_bytes) as usize;
        let pos;
        if undo {
            if i - closest_target_usage <= max_trans_offset {
                let n = read_le32(data, operand_pos);
                write_le32(data, operand_pos, n.wrapping_sub(i as u32));
            }
            pos = (i as u16).wrapping_add(read_le16(data, operand_pos));
        } else {
            pos = (i as u16).wrapping_add(read_le16(data, operand_pos));
            if i - closest_target_usage <= max_trans_offset {
                let n = read_le32(data, operand_pos);
                write_le32(data, operand_pos, n.wrapping_add(i as u32));
            }
        }

        i += num_op_bytes + 4 - 1;

        if i - last_target_usages[pos as usize] <= X86_MAX_GOOD_TARGET_OFFSET {
            closest_target_usage = i;
        }
        last_target_usages[pos as usize] = i;

        i += 1;
    }
}

/// Recent offsets for LZ matches. Updates lag one step behind decoding:
/// the producer stages the next offset in `upcoming_offset`, and
/// [`update`](Self::update) promotes `prev_offset` into the queue while
/// moving `upcoming_offset` into `prev_offset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LzLruQueues {
    pub recent_offsets: [u32; NUM_RECENT_OFFSETS + 1],
    pub prev_offset: u32,
    pub upcoming_offset: u32,
}

impl Default for LzLruQueues {
    fn default() -> Self {
        let mut recent_offsets = [0; NUM_RECENT_OFFSETS + 1];
        for (i, offset) in recent_offsets.iter_mut().enumerate() {
            *offset = i as u32 + 1;
        }
        Self {
            recent_offsets,
            prev_offset: 0,
            upcoming_offset: 0,
        }
    }
}

impl LzLruQueues {
    pub fn update(&mut self) {
        if self.prev_offset != 0 {
            for i in (0..NUM_RECENT_OFFSETS).rev() {
                self.recent_offsets[i + 1] = self.recent_offsets[i];
            }
            self.recent_offsets[0] = self.prev_offset;
        }
        self.prev_offset = self.upcoming_offset;
    }
}

/// Recent (offset, power) pairs for delta matches, with the same
/// one-step-lagged update discipline as [`LzLruQueues`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaLruQueues {
    pub recent_offsets: [u32; NUM_RECENT_OFFSETS + 1],
    pub recent_powers: [u32; NUM_RECENT_OFFSETS + 1],
    pub prev_offset: u32,
    pub prev_power: u32,
    pub upcoming_offset: u32,
    pub upcoming_power: u32,
}

impl Default for DeltaLruQueues {
    fn default() -> Self {
        let mut recent_offsets = [0; NUM_RECENT_OFFSETS + 1];
        for (i, offset) in recent_offsets.iter_mut().enumerate() {
            *offset = i as u32 + 1;
        }
        Self {
            recent_offsets,
            recent_powers: [0; NUM_RECENT_OFFSETS + 1],
            prev_offset: 0,
            prev_power: 0,
            upcoming_offset: 0,
            upcoming_power: 0,
        }
    }
}

impl DeltaLruQueues {
    pub fn update(&mut self) {
        if self.prev_offset != 0 {
            for i in (0..NUM_RECENT_OFFSETS).rev() {
                self.recent_offsets[i + 1] = self.recent_offsets[i];
                self.recent_powers[i + 1] = self.recent_powers[i];
            }
            self.recent_offsets[0] = self.prev_offset;
            self.recent_powers[0] = self.prev_power;
        }
        self.prev_offset = self.upcoming_offset;
        self.prev_power = self.upcoming_power;
    }
}

/// Both LRU queues, as each worker's decoder or encoder carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LruQueues {
    pub lz: LzLruQueues,
    pub delta: DeltaLruQueues,
}

impl LruQueues {
    pub fn update(&mut self) {
        self.lz.update();
        self.delta.update();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn slot_base_tables() {
        let position = position_slot_base();
        let length = length_slot_base();

        // First run of deltas is 1, so the tables open 1, 2, 3, ...
        assert_eq!(position[0], 1);
        assert_eq!(position[1], 2);
        assert_eq!(length[0], 1);

        assert_eq!(position[MAX_NUM_OFFSET_SYMS], 0x7fff_ffff);
        assert_eq!(length[NUM_LEN_SYMS], 0x4001_08ab);

        assert!(position.windows(2).all(|w| w[0] < w[1]));
        assert!(length.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn slot_lookup_matches_bases() {
        let bases = position_slot_base();
        for slot in 0..16 {
            assert_eq!(get_slot(bases[slot], bases), slot);
            if bases[slot + 1] - bases[slot] > 1 {
                assert_eq!(get_slot(bases[slot + 1] - 1, bases), slot);
            }
        }
        let lengths = length_slot_base();
        assert_eq!(get_slot(lengths[0], lengths), 0);
        assert_eq!(get_slot(lengths[NUM_LEN_SYMS] - 1, lengths), NUM_LEN_SYMS - 1);
    }

    #[test]
    fn slot_bases_race_free_first_use() {
        let barrier = Arc::new(Barrier::new(32));
        let handles: Vec<_> = (0..32)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    (position_slot_base()[17], length_slot_base()[11])
                })
            })
            .collect();
        let expected = (position_slot_base()[17], length_slot_base()[11]);
        for handle in handles {
            assert_eq!(handle.join().unwrap(), expected);
        }
    }

    #[test]
    fn x86_filter_is_involutive() {
        let mut data = vec![0u8; 64];
        // call-rel at offset 0 with operand 0x0000_3412
        data[0] = 0xe8;
        data[1] = 0x12;
        data[2] = 0x34;
        // a jump-rel and a load-rel later in the buffer
        data[8] = 0xe9;
        data[16] = 0x48;
        data[17] = 0x8b;
        data[18] = 0x05;
        data[19] = 0x99;
        let original = data.clone();

        let mut scratch = vec![0i32; X86_TARGET_WINDOW];
        x86_filter(&mut data, &mut scratch, false);
        x86_filter(&mut data, &mut scratch, true);
        assert_eq!(data, original);
    }

    #[test]
    fn x86_filter_translates_call_rel() {
        // Two calls whose operands land on the same 16-bit target-window
        // position establish a good target; a third call close behind it
        // is translated by its own position. The first two are left
        // untouched because no good target precedes them.
        let mut data = vec![0u8; 64];
        data[0] = 0xe8;
        data[8] = 0xe8;
        data[9] = 0xf8;
        data[10] = 0xff;
        data[16] = 0xe8;
        data[17] = 0x20;

        let mut scratch = vec![0i32; X86_TARGET_WINDOW];
        let mut filtered = data.clone();
        x86_filter(&mut filtered, &mut scratch, false);
        assert_eq!(filtered[..16], data[..16]);
        assert_eq!(
            u32::from_le_bytes([filtered[17], filtered[18], filtered[19], filtered[20]]),
            0x20 + 16
        );

        x86_filter(&mut filtered, &mut scratch, true);
        assert_eq!(filtered, data);
    }

    #[test]
    fn x86_filter_ignores_short_buffers() {
        let mut data = vec![0xe8u8; 11];
        let original = data.clone();
        let mut scratch = vec![0i32; X86_TARGET_WINDOW];
        x86_filter(&mut data, &mut scratch, false);
        assert_eq!(data, original);
    }

    #[test]
    fn lz_lru_updates_lag_one_step() {
        let mut lz = LzLruQueues::default();
        assert_eq!(lz.recent_offsets, [1, 2, 3, 4]);

        lz.upcoming_offset = 100;
        lz.update();
        // First update only stages: prev was 0.
        assert_eq!(lz.recent_offsets, [1, 2, 3, 4]);
        assert_eq!(lz.prev_offset, 100);

        lz.upcoming_offset = 200;
        lz.update();
        assert_eq!(lz.recent_offsets, [100, 1, 2, 3]);
        assert_eq!(lz.prev_offset, 200);
    }

    #[test]
    fn delta_lru_tracks_powers() {
        let mut delta = DeltaLruQueues::default();
        delta.upcoming_offset = 7;
        delta.upcoming_power = 2;
        delta.update();
        delta.upcoming_offset = 0;
        delta.upcoming_power = 0;
        delta.update();
        assert_eq!(delta.recent_offsets[0], 7);
        assert_eq!(delta.recent_powers[0], 2);
    }
}
