#![allow(unused_macros)]

/// Helper macro for locking items
///
/// ```rust, ignore
///  let mut state = lock!(self.state);
///  state.pending.push_front(spec);
/// ```
macro_rules! lock {
    ($lock:expr) => {
        $lock.lock().expect("Failed to acquire lock")
    };
}

/// Helper macro for reading locked items
///
/// ```rust, ignore
///  let index = read_lock!(root.index);
///  let candidates = index.get(name);
/// ```
macro_rules! read_lock {
    ($rwlock:expr) => {
        $rwlock.read().expect("Failed to acquire read lock")
    };
}

/// Helper macro for writing to locked items
///
/// ```rust, ignore
///  let mut index = write_lock!(root.index);
///  index.add_mapping("a/b", "lib/b.jar");
/// ```
macro_rules! write_lock {
    ($rwlock:expr) => {
        $rwlock.write().expect("Failed to acquire write lock")
    };
}
