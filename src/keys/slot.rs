//! Record-id to key-slot addressing
//!
//! Records share keys in blocks of 100 ids. Ids 0..=100 map to slot 0;
//! above that the slot is `id / 100`, so 101..=199 share slot 1, 200..=299
//! slot 2, and so on. Slot 0 covers 101 ids, every later slot 100.
//! Existing key files depend on this mapping: changing it changes which
//! records share a key.

/// Ids covered by one key slot
pub const RECORDS_PER_SLOT: u64 = 100;

pub fn slot_for_record(record_id: u64) -> u64 {
    if record_id <= RECORDS_PER_SLOT {
        0
    } else {
        record_id / RECORDS_PER_SLOT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_block_shares_slot_zero() {
        assert_eq!(slot_for_record(0), 0);
        assert_eq!(slot_for_record(99), 0);
        assert_eq!(slot_for_record(100), 0);
    }

    #[test]
    fn test_later_ids_bucket_by_hundreds() {
        assert_eq!(slot_for_record(101), 1);
        assert_eq!(slot_for_record(150), 1);
        assert_eq!(slot_for_record(180), 1);
        assert_eq!(slot_for_record(199), 1);
        assert_eq!(slot_for_record(200), 2);
        assert_eq!(slot_for_record(4095), 40);
    }
}
