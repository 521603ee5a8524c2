use nix::libc;
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ptr::NonNull;
use std::sync::Arc;

fn map_read(map: *const u8, total: usize, dst: &mut [u8], mut offset: usize) -> usize {
    let mut length = dst.len();
    if map.is_null() || length == 0 || total == 0 {
        return 0;
    }
    offset %= total;
    if length > total {
        length = total;
    }
    let mut copied = 0;
    while length > 0 {
        let take = (total - offset).min(length);
        unsafe {
            std::ptr::copy_nonoverlapping(map.add(offset), dst[copied..].as_mut_ptr(), take);
        }
        copied += take;
        length -= take;
        offset = 0;
    }
    copied
}

fn map_write(map: *mut u8, total: usize, src: &[u8], mut offset: usize) -> usize {
    if map.is_null() || src.is_empty() || total == 0 {
        return 0;
    }
    offset %= total;
    let mut length = src.len().min(total);
    let mut copied = 0;
    while length > 0 {
        let take = (total - offset).min(length);
        unsafe {
            std::ptr::copy_nonoverlapping(src[copied..].as_ptr(), map.add(offset), take);
        }
        copied += take;
        length -= take;
        offset = 0;
    }
    copied
}

fn read_value<T: Copy + Default>(map: *const u8, total: usize, offset: usize) -> T {
    if map.is_null() || offset.saturating_add(std::mem::size_of::<T>()) > total {
        return T::default();
    }
    unsafe { std::ptr::read_volatile(map.add(offset) as *const T) }
}

fn write_value<T: Copy>(map: *mut u8, total: usize, offset: usize, value: T) -> bool {
    if map.is_null() || offset.saturating_add(std::mem::size_of::<T>()) > total {
        return false;
    }
    unsafe { std::ptr::write_volatile(map.add(offset) as *mut T, value) };
    true
}

/// Zeroed heap memory that two owners address concurrently, standing in for a
/// kernel mapping when no device is involved.
#[derive(Debug)]
pub struct SharedRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    pub fn new(len: usize) -> std::io::Result<Arc<Self>> {
        let layout = Layout::from_size_align(len.max(1), 16)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) })
            .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::OutOfMemory))?;
        Ok(Arc::new(Self { ptr, layout }))
    }

    pub fn len(&self) -> usize {
        self.layout.size()
    }

    pub fn is_empty(&self) -> bool {
        self.layout.size() == 0
    }

    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize {
        map_read(self.ptr.as_ptr(), self.len(), dst, offset)
    }

    pub fn write_bytes(&self, offset: usize, src: &[u8]) -> usize {
        map_write(self.ptr.as_ptr(), self.len(), src, offset)
    }

    pub fn read_value<T: Copy + Default>(&self, offset: usize) -> T {
        read_value(self.ptr.as_ptr(), self.len(), offset)
    }

    pub fn write_value<T: Copy>(&self, offset: usize, value: T) -> bool {
        write_value(self.ptr.as_ptr(), self.len(), offset, value)
    }
}

impl Drop for SharedRegion {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

#[derive(Debug)]
enum Backing {
    Device,
    Shared(#[allow(dead_code)] Arc<SharedRegion>),
}

/// A mapping of the data buffer or of a status/control page. Device
/// mappings are released with `munmap` on drop.
#[derive(Debug)]
pub struct MmapArea {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

unsafe impl Send for MmapArea {}

impl MmapArea {
    /// # Safety
    /// `ptr` must come from a successful `mmap` of `len` bytes that nothing
    /// else will unmap.
    pub unsafe fn from_raw_mapping(ptr: *mut libc::c_void, len: usize) -> Option<Self> {
        NonNull::new(ptr as *mut u8).map(|ptr| Self {
            ptr,
            len,
            backing: Backing::Device,
        })
    }

    pub fn from_shared(region: Arc<SharedRegion>) -> Self {
        Self {
            ptr: region.ptr,
            len: region.len(),
            backing: Backing::Shared(region),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) -> usize {
        map_read(self.ptr.as_ptr(), self.len, dst, offset)
    }

    pub fn write_bytes(&mut self, offset: usize, src: &[u8]) -> usize {
        map_write(self.ptr.as_ptr(), self.len, src, offset)
    }

    pub fn read_value<T: Copy + Default>(&self, offset: usize) -> T {
        read_value(self.ptr.as_ptr(), self.len, offset)
    }

    pub fn write_value<T: Copy>(&mut self, offset: usize, value: T) -> bool {
        write_value(self.ptr.as_ptr(), self.len, offset, value)
    }
}

impl Drop for MmapArea {
    fn drop(&mut self) {
        if let Backing::Device = self.backing {
            unsafe {
                libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len);
            }
        }
    }
}
