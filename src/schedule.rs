/// Time-ordered list of pending effects. Hosts poll `due(now)` and fire what
/// comes back; nothing runs on its own.
#[derive(Clone, Debug)]
pub struct Scheduler<E> {
    entries: Vec<Scheduled<E>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Scheduled<E> {
    pub fire_at: u64,
    pub effect: E,
}

impl<E> Default for Scheduler<E> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<E> Scheduler<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, fire_at: u64, effect: E) {
        // keep sorted; equal deadlines fire in insertion order
        let pos = self.entries.partition_point(|e| e.fire_at <= fire_at);
        self.entries.insert(pos, Scheduled { fire_at, effect });
    }

    /// Removes and returns every effect with `fire_at <= now`, earliest first.
    pub fn due(&mut self, now: u64) -> Vec<E> {
        let split = self.entries.partition_point(|e| e.fire_at <= now);
        self.entries.drain(..split).map(|e| e.effect).collect()
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.entries.first().map(|e| e.fire_at)
    }

    pub fn pending(&self) -> &[Scheduled<E>] {
        &self.entries
    }

    pub fn retain(&mut self, mut keep: impl FnMut(&E) -> bool) {
        self.entries.retain(|e| keep(&e.effect));
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
