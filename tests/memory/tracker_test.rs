/*!
 * Tracker Tests
 * Live list bookkeeping, statistics and checksum verification
 */

use engine_memory::memory::{AllocHeader, MemoryStatistics, MemoryTracker, TrackedHeader};
use engine_memory::{AllocatorId, MemoryError, MemoryParam, MemorySystem};
use pretty_assertions::assert_eq;
use std::time::Instant;

fn track(tracker: &MemoryTracker, bytes: usize, address: u64) -> TrackedHeader {
    let mut header = TrackedHeader::new(AllocatorId(0), 0);
    tracker.track(&mut header, &MemoryParam::new(bytes), Instant::now(), address);
    header
}

#[test]
fn test_k_tracks_then_untracks_leave_empty_list() {
    let tracker = MemoryTracker::new();
    let k = 64u64;

    let headers: Vec<_> = (1..=k)
        .map(|i| (track(&tracker, i as usize, i * 0x100), i * 0x100))
        .collect();
    assert_eq!(tracker.live_allocations().len(), k as usize);

    // Interleave front and back removals to exercise both unlink paths
    let (evens, odds): (Vec<_>, Vec<_>) = headers.iter().partition(|(_, a)| (a / 0x100) % 2 == 0);
    for (header, address) in evens.iter().chain(odds.iter().rev()) {
        tracker.untrack(header, *address).unwrap();
    }

    let stats = tracker.statistics();
    assert!(tracker.is_empty());
    assert!(tracker.live_allocations().is_empty());
    assert_eq!(stats.current_allocations, 0);
    assert_eq!(stats.current_bytes, 0);
    assert_eq!(stats.total_allocations, k);
    assert_eq!(stats.total_bytes, k * (k + 1) / 2);
    assert_eq!(stats.peak_allocations, k as usize);
}

#[test]
fn test_slot_survives_header_round_trip() {
    let tracker = MemoryTracker::new();
    let header = track(&tracker, 48, 0x2000);

    let mut bytes = [0u8; TrackedHeader::RAW_SIZE];
    header.encode(&mut bytes);
    let decoded = TrackedHeader::decode(&bytes);

    assert_eq!(decoded.slot, header.slot);
    tracker.untrack(&decoded, 0x2000).unwrap();
}

#[test]
fn test_flipped_checksum_fails_untrack() {
    let tracker = MemoryTracker::new();
    let mut header = track(&tracker, 48, 0x2000);
    header.checksum ^= 0x0100;

    assert!(matches!(
        tracker.untrack(&header, 0x2000),
        Err(MemoryError::CorruptionDetected { address: 0x2000, .. })
    ));
    assert_eq!(tracker.statistics().current_allocations, 1);
}

#[test]
fn test_peaks_outlive_frees() {
    let memory = MemorySystem::create_memory(16).unwrap();

    let a = memory.alloc(MemoryParam::new(1000)).unwrap();
    let b = memory.alloc(MemoryParam::new(3000)).unwrap();
    memory.free(a);
    let c = memory.alloc(MemoryParam::new(500)).unwrap();

    let stats = memory.statistics();
    assert_eq!(stats.current_allocations, 2);
    assert_eq!(stats.current_bytes, 3500);
    assert_eq!(stats.peak_bytes, 4000);
    assert_eq!(stats.peak_allocations, 2);
    assert_eq!(stats.average_allocation_size, 1500);

    memory.free(b);
    memory.free(c);
    memory.try_destroy().unwrap();
}

#[test]
fn test_statistics_serialize() {
    let memory = MemorySystem::create_memory(16).unwrap();
    let ptr = memory.alloc(MemoryParam::new(256)).unwrap();

    let json = memory.statistics().to_json().unwrap();
    let parsed: MemoryStatistics = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.current_bytes, 256);
    assert_eq!(parsed.total_allocations, 1);

    memory.free(ptr);
    memory.log_statistics();
    memory.log_allocations();
    memory.try_destroy().unwrap();
}
