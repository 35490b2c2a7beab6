use std::collections::VecDeque;

/// Reverse mapping from a frame to the page occupying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    pub pid: usize,
    pub page: usize,
}

/// Physical frame descriptor. No page contents are kept, only who owns it
/// and the bookkeeping the replacement policies need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: usize,
    pub owner: Option<FrameOwner>,
    /// Aging counter, only meaningful to the aging pager.
    pub age: u32,
    /// Instruction count at which the frame was last seen active.
    pub last_active: u64,
}

impl Frame {
    pub fn new(id: usize) -> Self {
        Frame {
            id,
            owner: None,
            age: 0,
            last_active: 0,
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.owner.is_none()
    }

    /// Hand the frame to a new page, restarting its aging and activity clocks.
    pub fn assign(&mut self, owner: FrameOwner, now: u64) {
        self.owner = Some(owner);
        self.age = 0;
        self.last_active = now;
    }

    /// Drop ownership so the frame can go back to the free pool.
    pub fn reset(&mut self) {
        self.owner = None;
        self.age = 0;
        self.last_active = 0;
    }
}

/// Every physical frame, indexed by frame number.
#[derive(Debug, Clone)]
pub struct FrameTable {
    frames: Vec<Frame>,
}

impl FrameTable {
    /// Create `count` free frames numbered `0..count`
    pub fn new(count: usize) -> Self {
        FrameTable {
            frames: (0..count).map(Frame::new).collect(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }

    /// Number of frames currently owned by some page
    pub fn owned_count(&self) -> usize {
        self.frames.iter().filter(|f| !f.is_free()).count()
    }
}

impl std::ops::Index<usize> for FrameTable {
    type Output = Frame;

    fn index(&self, idx: usize) -> &Frame {
        &self.frames[idx]
    }
}

impl std::ops::IndexMut<usize> for FrameTable {
    fn index_mut(&mut self, idx: usize) -> &mut Frame {
        &mut self.frames[idx]
    }
}

/// Frames nobody owns, handed out oldest-released first.
#[derive(Debug, Clone, Default)]
pub struct FreeFramePool {
    frames: VecDeque<usize>,
}

impl FreeFramePool {
    /// A pool holding every frame of `table`, in frame order
    pub fn full(table: &FrameTable) -> Self {
        FreeFramePool {
            frames: (0..table.len()).collect(),
        }
    }

    /// Take the frame at the head of the pool, if any.
    pub fn acquire(&mut self) -> Option<usize> {
        self.frames.pop_front()
    }

    /// Put a frame back at the tail. The caller must have reset its ownership.
    pub fn release(&mut self, frame: usize) {
        debug_assert!(!self.frames.contains(&frame), "frame {} released twice", frame);
        self.frames.push_back(frame);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, frame: usize) -> bool {
        self.frames.contains(&frame)
    }

    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.frames.iter().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_table_initialization() {
        let table = FrameTable::new(4);
        assert_eq!(table.len(), 4);
        assert_eq!(table.owned_count(), 0);
        for (i, frame) in table.iter().enumerate() {
            assert_eq!(frame.id, i);
            assert!(frame.is_free());
        }
    }

    #[test]
    fn test_assign_restarts_clocks() {
        let mut frame = Frame::new(2);
        frame.age = 0xdead_beef;
        frame.last_active = 3;

        frame.assign(FrameOwner { pid: 1, page: 9 }, 77);
        assert_eq!(frame.owner, Some(FrameOwner { pid: 1, page: 9 }));
        assert_eq!(frame.age, 0);
        assert_eq!(frame.last_active, 77);

        frame.reset();
        assert!(frame.is_free());
    }

    #[test]
    fn test_pool_is_fifo() {
        let table = FrameTable::new(3);
        let mut pool = FreeFramePool::full(&table);

        assert_eq!(pool.acquire(), Some(0));
        assert_eq!(pool.acquire(), Some(1));
        pool.release(0);
        assert_eq!(pool.acquire(), Some(2));
        assert_eq!(pool.acquire(), Some(0));
        assert_eq!(pool.acquire(), None);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_pool_release_order() {
        let table = FrameTable::new(4);
        let mut pool = FreeFramePool::full(&table);
        while pool.acquire().is_some() {}

        pool.release(3);
        pool.release(1);
        assert_eq!(pool.iter().collect::<Vec<_>>(), vec![3, 1]);
        assert!(pool.contains(1));
        assert!(!pool.contains(0));
    }
}
