use parking_lot::Mutex;

/// Number of IDs after `start_id` before allocation wraps around.
pub(crate) const WRAP_IDS_AFTER: i32 = 200;

/// Upper bound on concurrently pending requests. Each request uses an even ID and the odd ID
/// after it, so the wrap window holds this many pairs.
pub const MAX_IN_FLIGHT: usize = (WRAP_IDS_AFTER / 2) as usize;

/// Hands out request IDs.
///
/// IDs are always even, so `id + 1` is free to be used by the request's confirmation command.
/// Values stay in `start_id..=start_id + WRAP_IDS_AFTER + 1`.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    start_id: i32,
    next_id: Mutex<i32>,
}

impl IdAllocator {
    /// `start_id + WRAP_IDS_AFTER + 3` must not overflow; [`crate::Config::validate`] checks this.
    pub fn new(start_id: i32) -> Self {
        IdAllocator {
            start_id,
            next_id: Mutex::new(start_id),
        }
    }

    pub fn next_id(&self) -> i32 {
        let mut next_id = self.next_id.lock();

        if *next_id < self.start_id || *next_id > self.start_id + WRAP_IDS_AFTER + 1 {
            *next_id = self.start_id;
        }

        if *next_id % 2 != 0 {
            *next_id += 1;
        }

        let id = *next_id;
        *next_id += 2;
        id
    }
}
