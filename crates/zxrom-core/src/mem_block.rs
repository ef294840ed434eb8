use core::ops::{Deref, DerefMut};

/// Small-stack targets keep large blocks on the heap.
#[cfg(any(feature = "boxed-tables", target_arch = "arm", target_arch = "wasm32"))]
type Storage<T, const N: usize> = Box<[T; N]>;

#[cfg(not(any(feature = "boxed-tables", target_arch = "arm", target_arch = "wasm32")))]
type Storage<T, const N: usize> = [T; N];

#[cfg(any(feature = "boxed-tables", target_arch = "arm", target_arch = "wasm32"))]
fn storage<T: Copy, const N: usize>(value: T) -> Storage<T, N> {
    Box::new([value; N])
}

#[cfg(not(any(feature = "boxed-tables", target_arch = "arm", target_arch = "wasm32")))]
fn storage<T: Copy, const N: usize>(value: T) -> Storage<T, N> {
    [value; N]
}

/// Fixed-size backing store for ROM images and lookup tables. Indexing goes
/// through the slice, so a table lookup is a single bounds-checked load.
#[repr(transparent)]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemBlock<T, const N: usize>(Storage<T, N>);

pub type ByteBlock<const N: usize> = MemBlock<u8, N>;

impl<T: Copy, const N: usize> MemBlock<T, N> {
    pub fn filled(value: T) -> Self {
        Self(storage(value))
    }
}

impl<T: Copy + Default, const N: usize> MemBlock<T, N> {
    pub fn new() -> Self {
        Self::filled(T::default())
    }

    /// `None` unless `src` holds exactly `N` elements.
    pub fn from_slice(src: &[T]) -> Option<Self> {
        if src.len() != N {
            return None;
        }
        let mut block = Self::new();
        block.copy_from_slice(src);
        Some(block)
    }
}

impl<T: Copy + Default, const N: usize> Default for MemBlock<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> Deref for MemBlock<T, N> {
    type Target = [T];

    #[inline]
    fn deref(&self) -> &[T] {
        self.0.as_slice()
    }
}

impl<T, const N: usize> DerefMut for MemBlock<T, N> {
    #[inline]
    fn deref_mut(&mut self) -> &mut [T] {
        self.0.as_mut_slice()
    }
}
