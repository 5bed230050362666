use parking_lot::Mutex;
use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    #[error("invalid pool configuration: {0}")]
    InvalidConfig(String),
    #[error("chunk allocation of {0} bytes failed")]
    AllocationFailed(usize),
    #[error("global pool is already configured")]
    AlreadyConfigured,
}

/// PoolConfig sizes a Pool. `block_size` is rounded up to pointer
/// alignment so that the intrusive free list can thread a next-pointer
/// through each unused block.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub block_size: usize,
    pub blocks_per_chunk: usize,
}

impl PoolConfig {
    pub fn new(block_size: usize, blocks_per_chunk: usize) -> Self {
        Self {
            block_size,
            blocks_per_chunk,
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: 64,
            blocks_per_chunk: 1024,
        }
    }
}

const BLOCK_ALIGN: usize = std::mem::align_of::<*mut u8>();

/// Pool is a fixed-block allocator. Blocks are carved from contiguous
/// chunks owned by the pool, and unused blocks are threaded into an
/// intrusive free list with the next-pointer stored inside the block
/// itself, so bookkeeping costs zero bytes per block.
///
/// Allocation and deallocation are O(1): pop or push the free-list head.
/// When the free list is empty the pool grows by exactly one chunk.
///
/// A single Mutex guards the free list and chunk vector.
pub struct Pool {
    block_size: usize,
    blocks_per_chunk: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    chunks: Vec<Chunk>,
    free_head: Option<NonNull<FreeNode>>,
    allocated: usize,
}

// A free block's leading word points at the next free block.
struct FreeNode {
    next: Option<NonNull<FreeNode>>,
}

struct Chunk {
    ptr: NonNull<u8>,
    layout: Layout,
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // Safety: `ptr` was returned by alloc_zeroed with this exact layout,
        // and the pool is being dropped so no block can still be in use.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

// Safety: all pointers held by Inner refer to chunk memory owned
// exclusively by the pool, and every access goes through the Mutex.
unsafe impl Send for Pool {}
unsafe impl Sync for Pool {}

impl Pool {
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        if config.block_size == 0 {
            return Err(Error::InvalidConfig("block_size must be non-zero".into()));
        }
        if config.blocks_per_chunk == 0 {
            return Err(Error::InvalidConfig(
                "blocks_per_chunk must be non-zero".into(),
            ));
        }
        // Each block must be able to hold the free-list next-pointer,
        // and must be pointer-aligned for it.
        let block_size = config.block_size.max(std::mem::size_of::<FreeNode>());
        let block_size = block_size
            .checked_add(BLOCK_ALIGN - 1)
            .ok_or_else(|| Error::InvalidConfig("block_size overflows".into()))?
            / BLOCK_ALIGN
            * BLOCK_ALIGN;

        if block_size
            .checked_mul(config.blocks_per_chunk)
            .map(|n| n > isize::MAX as usize)
            .unwrap_or(true)
        {
            return Err(Error::InvalidConfig("chunk size overflows".into()));
        }

        Ok(Self {
            block_size,
            blocks_per_chunk: config.blocks_per_chunk,
            inner: Mutex::new(Inner {
                chunks: Vec::new(),
                free_head: None,
                allocated: 0,
            }),
        })
    }

    /// The effective (alignment-rounded) block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Allocate one block, growing by a chunk if the free list is empty.
    /// The returned RAII guard exposes the block as a zero-initialized-or-
    /// recycled byte buffer and returns it to the pool on drop.
    pub fn get(&self) -> Result<Block<'_>, Error> {
        let ptr = self.allocate()?;
        Ok(Block { ptr, pool: self })
    }

    /// Allocate one block. Prefer `get`; callers of `allocate` must
    /// eventually pass the pointer to `deallocate` exactly once.
    pub fn allocate(&self) -> Result<NonNull<u8>, Error> {
        let mut inner = self.inner.lock();

        let head = match inner.free_head {
            Some(head) => head,
            None => {
                self.grow(&mut inner)?;
                inner.free_head.expect("grow pushed a chunk of free blocks")
            }
        };
        // Safety: `head` is a free block within chunk memory we own; free
        // blocks always hold a valid FreeNode in their leading bytes.
        inner.free_head = unsafe { head.as_ref().next };
        inner.allocated += 1;
        Ok(head.cast())
    }

    /// Return a block to the pool.
    ///
    /// # Safety
    /// `ptr` must have been returned by `allocate` on this same pool and
    /// must not be freed twice or used after this call.
    pub unsafe fn deallocate(&self, ptr: NonNull<u8>) {
        let mut inner = self.inner.lock();
        debug_assert!(
            self.owns_locked(&inner, ptr),
            "deallocate of a pointer foreign to this pool"
        );
        debug_assert!(
            !self.is_free_locked(&inner, ptr),
            "double free of pool block"
        );

        let mut node = ptr.cast::<FreeNode>();
        node.as_mut().next = inner.free_head;
        inner.free_head = Some(node);
        inner.allocated -= 1;
    }

    /// Whether `ptr` falls on a block boundary of a chunk owned by this pool.
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        let inner = self.inner.lock();
        self.owns_locked(&inner, ptr)
    }

    /// Statistics computed on demand from the locked state.
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        let capacity = inner.chunks.len() * self.blocks_per_chunk;
        PoolStats {
            chunk_count: inner.chunks.len(),
            allocated_blocks: inner.allocated,
            capacity_blocks: capacity,
            free_blocks: capacity - inner.allocated,
        }
    }

    fn grow(&self, inner: &mut Inner) -> Result<(), Error> {
        let chunk_bytes = self.block_size * self.blocks_per_chunk;
        let layout = Layout::from_size_align(chunk_bytes, BLOCK_ALIGN)
            .map_err(|_| Error::AllocationFailed(chunk_bytes))?;

        // Safety: layout has non-zero size (validated in `new`).
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return Err(Error::AllocationFailed(chunk_bytes));
        };

        // Take ownership immediately: if the chunks vector cannot grow,
        // Chunk's Drop releases the allocation before the error propagates.
        let chunk = Chunk { ptr, layout };
        if let Err(e) = inner.chunks.try_reserve(1) {
            tracing::warn!(chunk_bytes, "pool chunk registration failed: {e}");
            return Err(Error::AllocationFailed(chunk_bytes));
        }
        inner.chunks.push(chunk);

        // Thread every block of the new chunk onto the free list.
        for block in (0..self.blocks_per_chunk).rev() {
            // Safety: block offsets are in-bounds of the chunk allocation
            // and BLOCK_ALIGN-aligned, so each holds a valid FreeNode slot.
            unsafe {
                let mut node = NonNull::new_unchecked(
                    ptr.as_ptr().add(block * self.block_size) as *mut FreeNode
                );
                node.as_mut().next = inner.free_head;
                inner.free_head = Some(node);
            }
        }
        tracing::debug!(
            chunks = inner.chunks.len(),
            chunk_bytes,
            "pool grew by one chunk"
        );
        Ok(())
    }

    fn owns_locked(&self, inner: &Inner, ptr: NonNull<u8>) -> bool {
        let addr = ptr.as_ptr() as usize;
        inner.chunks.iter().any(|c| {
            let base = c.ptr.as_ptr() as usize;
            addr >= base
                && addr < base + c.layout.size()
                && (addr - base) % self.block_size == 0
        })
    }

    // Debug-build double-free detection: walk the free list.
    #[allow(dead_code)]
    fn is_free_locked(&self, inner: &Inner, ptr: NonNull<u8>) -> bool {
        let mut cursor = inner.free_head;
        while let Some(node) = cursor {
            if node.cast() == ptr {
                return true;
            }
            // Safety: free-list nodes are valid FreeNodes by construction.
            cursor = unsafe { node.as_ref().next };
        }
        false
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("block_size", &self.block_size)
            .field("blocks_per_chunk", &self.blocks_per_chunk)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Block is an RAII guard over one allocated pool block.
pub struct Block<'p> {
    ptr: NonNull<u8>,
    pool: &'p Pool,
}

impl Block<'_> {
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }
}

impl std::ops::Deref for Block<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        // Safety: the block spans block_size bytes of chunk memory which
        // was zero-initialized at chunk creation and stays initialized.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.pool.block_size) }
    }
}

impl std::ops::DerefMut for Block<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and the guard has exclusive ownership.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.pool.block_size) }
    }
}

impl Drop for Block<'_> {
    fn drop(&mut self) {
        // Safety: the guard owns this allocation and is being consumed.
        unsafe { self.pool.deallocate(self.ptr) };
    }
}

impl std::fmt::Debug for Block<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Block({:p}, {})", self.ptr, self.pool.block_size)
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub chunk_count: usize,
    pub allocated_blocks: usize,
    pub capacity_blocks: usize,
    pub free_blocks: usize,
}

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: Mutex<PoolConfig> = Mutex::new(PoolConfig::default());
    static ref GLOBAL: Pool = {
        let config = *GLOBAL_CONFIG.lock();
        Pool::new(config).expect("configure() validated this config")
    };
}

static GLOBAL_IN_USE: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

/// Set the global pool's configuration. Must be called before the first
/// use of `global`; later calls fail with `AlreadyConfigured`.
pub fn configure(config: PoolConfig) -> Result<(), Error> {
    // Validate eagerly so a bad config surfaces here, not at first use.
    Pool::new(config)?;

    if GLOBAL_IN_USE.load(std::sync::atomic::Ordering::Acquire) {
        return Err(Error::AlreadyConfigured);
    }
    *GLOBAL_CONFIG.lock() = config;
    Ok(())
}

/// The lazily-initialized process-wide pool. The configuration in effect
/// at the first call is the one the pool keeps for the process lifetime.
pub fn global() -> &'static Pool {
    GLOBAL_IN_USE.store(true, std::sync::atomic::Ordering::Release);
    &GLOBAL
}
