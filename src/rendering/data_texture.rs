//! Updatable data textures
//!
//! The bucket manager only needs to create square textures and overwrite
//! rectangles of them. `DataTexture` is that seam; the wgpu backend is what
//! the renderer uses, the CPU backend keeps a mirror in memory for headless
//! runs.

use crate::error::{StreamingError, StreamingResult};
use parking_lot::Mutex;
use std::any::Any;
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Component type of a texel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TexelType {
    UnsignedByte,
    Float,
}

impl TexelType {
    pub fn component_size(self) -> u32 {
        match self {
            TexelType::UnsignedByte => 1,
            TexelType::Float => 4,
        }
    }
}

/// A square texture whose rectangles can be overwritten
pub trait DataTexture {
    fn width(&self) -> u32;

    /// Payload bytes per texel, as `update` expects them
    fn bytes_per_texel(&self) -> u32;

    /// Whether the backing GPU object is ready to receive updates
    fn is_initialized(&self) -> bool {
        true
    }

    /// Overwrite `width` x `height` texels starting at (`x_offset`, `y_offset`)
    fn update(
        &mut self,
        data: &[u8],
        x_offset: u32,
        y_offset: u32,
        width: u32,
        height: u32,
    ) -> StreamingResult<()>;

    /// Lets the renderer get at the backend type (e.g. a wgpu view)
    fn as_any(&self) -> &dyn Any;
}

pub trait TextureFactory {
    fn create_texture(
        &self,
        width: u32,
        channel_count: u32,
        texel_type: TexelType,
    ) -> StreamingResult<Box<dyn DataTexture>>;
}

fn check_update(
    texture_width: u32,
    bytes_per_texel: u32,
    data: &[u8],
    x_offset: u32,
    y_offset: u32,
    width: u32,
    height: u32,
) -> StreamingResult<()> {
    let expected = width as usize * height as usize * bytes_per_texel as usize;
    if data.len() != expected {
        return Err(StreamingError::TextureUpdate {
            reason: format!("expected {} bytes, got {}", expected, data.len()),
        });
    }
    if x_offset as u64 + width as u64 > texture_width as u64
        || y_offset as u64 + height as u64 > texture_width as u64
    {
        return Err(StreamingError::TextureUpdate {
            reason: format!(
                "rectangle {}x{} at ({}, {}) exceeds texture of width {}",
                width, height, x_offset, y_offset, texture_width
            ),
        });
    }
    Ok(())
}

/// Storage format of a texel and its size in bytes
///
/// Byte texels without a matching format are stored in the next wider one
/// and padded with zeros: 3 bytes go into `Rgba8Unorm`, 5 to 8 bytes into
/// `Rgba16Uint` and 9 to 16 bytes into `Rgba32Uint`.
pub fn texel_layout(
    channel_count: u32,
    texel_type: TexelType,
) -> StreamingResult<(wgpu::TextureFormat, u32)> {
    use wgpu::TextureFormat as F;
    match (texel_type, channel_count) {
        (TexelType::UnsignedByte, 1) => Ok((F::R8Unorm, 1)),
        (TexelType::UnsignedByte, 2) => Ok((F::Rg8Unorm, 2)),
        (TexelType::UnsignedByte, 3..=4) => Ok((F::Rgba8Unorm, 4)),
        (TexelType::UnsignedByte, 5..=8) => Ok((F::Rgba16Uint, 8)),
        (TexelType::UnsignedByte, 9..=16) => Ok((F::Rgba32Uint, 16)),
        (TexelType::Float, 1) => Ok((F::R32Float, 4)),
        (TexelType::Float, 2) => Ok((F::Rg32Float, 8)),
        (TexelType::Float, 3..=4) => Ok((F::Rgba32Float, 16)),
        (_, channels) => Err(StreamingError::UnsupportedTexelLayout { channels }),
    }
}

/// Widen every texel of `data` from `bytes_per_texel` to `stored_bytes_per_texel`
fn pad_texels(data: &[u8], bytes_per_texel: u32, stored_bytes_per_texel: u32) -> Cow<'_, [u8]> {
    if bytes_per_texel == stored_bytes_per_texel {
        return Cow::Borrowed(data);
    }
    let texel_count = data.len() / bytes_per_texel as usize;
    let padding = (stored_bytes_per_texel - bytes_per_texel) as usize;
    let mut padded = Vec::with_capacity(texel_count * stored_bytes_per_texel as usize);
    for texel in data.chunks_exact(bytes_per_texel as usize) {
        padded.extend_from_slice(texel);
        padded.extend(std::iter::repeat(0).take(padding));
    }
    Cow::Owned(padded)
}

/// Texture living on a wgpu device
pub struct WgpuDataTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    queue: Arc<wgpu::Queue>,
    width: u32,
    bytes_per_texel: u32,
    stored_bytes_per_texel: u32,
}

impl WgpuDataTexture {
    pub fn texture(&self) -> &wgpu::Texture {
        &self.texture
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }
}

impl DataTexture for WgpuDataTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn bytes_per_texel(&self) -> u32 {
        self.bytes_per_texel
    }

    fn update(
        &mut self,
        data: &[u8],
        x_offset: u32,
        y_offset: u32,
        width: u32,
        height: u32,
    ) -> StreamingResult<()> {
        check_update(self.width, self.bytes_per_texel, data, x_offset, y_offset, width, height)?;
        let texels = pad_texels(data, self.bytes_per_texel, self.stored_bytes_per_texel);
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: x_offset,
                    y: y_offset,
                    z: 0,
                },
                aspect: wgpu::TextureAspect::All,
            },
            &texels,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(width * self.stored_bytes_per_texel),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct WgpuTextureFactory {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
}

impl WgpuTextureFactory {
    pub fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self { device, queue }
    }
}

impl TextureFactory for WgpuTextureFactory {
    fn create_texture(
        &self,
        width: u32,
        channel_count: u32,
        texel_type: TexelType,
    ) -> StreamingResult<Box<dyn DataTexture>> {
        let (format, stored_bytes_per_texel) = texel_layout(channel_count, texel_type)?;

        // Get device limits to ensure we don't exceed GPU capabilities
        let max_dimension = self.device.limits().max_texture_dimension_2d;
        if width > max_dimension {
            return Err(StreamingError::InvalidTextureLayout {
                reason: format!("texture width {} exceeds GPU limit {}", width, max_dimension),
            });
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Bucket Data Texture"),
            size: wgpu::Extent3d {
                width,
                height: width,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        Ok(Box::new(WgpuDataTexture {
            texture,
            view,
            queue: Arc::clone(&self.queue),
            width,
            bytes_per_texel: channel_count * texel_type.component_size(),
            stored_bytes_per_texel,
        }))
    }
}

/// Texels and update count of a CPU texture
///
/// Texels are stored padded the same way the wgpu backend stores them.
#[derive(Debug, Default)]
pub struct CpuTextureStorage {
    pub width: u32,
    pub bytes_per_texel: u32,
    pub texels: Vec<u8>,
    pub update_count: usize,
}

/// Texture mirrored in main memory
pub struct CpuDataTexture {
    storage: Arc<Mutex<CpuTextureStorage>>,
    ready: Arc<AtomicBool>,
    width: u32,
    bytes_per_texel: u32,
    stored_bytes_per_texel: u32,
}

impl DataTexture for CpuDataTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn bytes_per_texel(&self) -> u32 {
        self.bytes_per_texel
    }

    fn is_initialized(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn update(
        &mut self,
        data: &[u8],
        x_offset: u32,
        y_offset: u32,
        width: u32,
        height: u32,
    ) -> StreamingResult<()> {
        check_update(self.width, self.bytes_per_texel, data, x_offset, y_offset, width, height)?;
        let texels = pad_texels(data, self.bytes_per_texel, self.stored_bytes_per_texel);
        let bpt = self.stored_bytes_per_texel as usize;
        let row_bytes = width as usize * bpt;
        let mut storage = self.storage.lock();
        for row in 0..height as usize {
            let start = ((y_offset as usize + row) * self.width as usize + x_offset as usize) * bpt;
            storage.texels[start..start + row_bytes]
                .copy_from_slice(&texels[row * row_bytes..(row + 1) * row_bytes]);
        }
        storage.update_count += 1;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Creates `CpuDataTexture`s and keeps a handle to each one's storage
pub struct CpuTextureFactory {
    ready: Arc<AtomicBool>,
    created: Mutex<Vec<Arc<Mutex<CpuTextureStorage>>>>,
}

impl CpuTextureFactory {
    pub fn new() -> Self {
        Self {
            ready: Arc::new(AtomicBool::new(true)),
            created: Mutex::new(Vec::new()),
        }
    }

    /// Textures report themselves uninitialized until `set_ready(true)`
    pub fn deferred() -> Self {
        let factory = Self::new();
        factory.set_ready(false);
        factory
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    /// Storages in creation order
    pub fn storages(&self) -> Vec<Arc<Mutex<CpuTextureStorage>>> {
        self.created.lock().clone()
    }
}

impl Default for CpuTextureFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureFactory for CpuTextureFactory {
    fn create_texture(
        &self,
        width: u32,
        channel_count: u32,
        texel_type: TexelType,
    ) -> StreamingResult<Box<dyn DataTexture>> {
        let (_, stored_bytes_per_texel) = texel_layout(channel_count, texel_type)?;
        let storage = Arc::new(Mutex::new(CpuTextureStorage {
            width,
            bytes_per_texel: stored_bytes_per_texel,
            texels: vec![0; width as usize * width as usize * stored_bytes_per_texel as usize],
            update_count: 0,
        }));
        self.created.lock().push(Arc::clone(&storage));
        Ok(Box::new(CpuDataTexture {
            storage,
            ready: Arc::clone(&self.ready),
            width,
            bytes_per_texel: channel_count * texel_type.component_size(),
            stored_bytes_per_texel,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cpu_texture_update_writes_rows() {
        let factory = CpuTextureFactory::new();
        let mut texture = factory.create_texture(4, 2, TexelType::UnsignedByte).unwrap();
        texture.update(&[1, 2, 3, 4, 5, 6, 7, 8], 1, 2, 2, 2).unwrap();

        let storage = factory.storages()[0].clone();
        let storage = storage.lock();
        // Row 2, texels 1 and 2
        assert_eq!(&storage.texels[(2 * 4 + 1) * 2..(2 * 4 + 3) * 2], &[1, 2, 3, 4]);
        assert_eq!(&storage.texels[(3 * 4 + 1) * 2..(3 * 4 + 3) * 2], &[5, 6, 7, 8]);
        assert_eq!(storage.update_count, 1);
    }

    #[test]
    fn test_update_rejects_bad_rectangles() {
        let factory = CpuTextureFactory::new();
        let mut texture = factory.create_texture(4, 1, TexelType::Float).unwrap();
        assert_eq!(texture.bytes_per_texel(), 4);
        assert!(texture.update(&[0; 8], 0, 0, 2, 2).is_err());
        assert!(texture.update(&[0; 16], 3, 0, 2, 2).is_err());
        assert!(texture.update(&[0; 16], 2, 2, 2, 2).is_ok());
    }

    #[test]
    fn test_deferred_readiness() {
        let factory = CpuTextureFactory::deferred();
        let texture = factory.create_texture(2, 4, TexelType::UnsignedByte).unwrap();
        assert!(!texture.is_initialized());
        factory.set_ready(true);
        assert!(texture.is_initialized());
    }

    #[test]
    fn test_texel_layouts() {
        use wgpu::TextureFormat as F;
        assert_eq!(texel_layout(4, TexelType::UnsignedByte).unwrap(), (F::Rgba8Unorm, 4));
        assert_eq!(texel_layout(2, TexelType::Float).unwrap(), (F::Rg32Float, 8));
        // Widths without an exact format are padded
        assert_eq!(texel_layout(3, TexelType::UnsignedByte).unwrap(), (F::Rgba8Unorm, 4));
        assert_eq!(texel_layout(8, TexelType::UnsignedByte).unwrap(), (F::Rgba16Uint, 8));
        assert_eq!(texel_layout(12, TexelType::UnsignedByte).unwrap(), (F::Rgba32Uint, 16));
        assert!(matches!(
            texel_layout(17, TexelType::UnsignedByte),
            Err(StreamingError::UnsupportedTexelLayout { channels: 17 })
        ));
        assert!(matches!(
            texel_layout(8, TexelType::Float),
            Err(StreamingError::UnsupportedTexelLayout { channels: 8 })
        ));
    }

    #[test]
    fn test_three_byte_texels_are_padded() {
        let factory = CpuTextureFactory::new();
        let mut texture = factory.create_texture(2, 3, TexelType::UnsignedByte).unwrap();
        assert_eq!(texture.bytes_per_texel(), 3);
        texture.update(&[1, 2, 3, 4, 5, 6], 0, 1, 2, 1).unwrap();

        let storage = factory.storages()[0].clone();
        let storage = storage.lock();
        assert_eq!(storage.bytes_per_texel, 4);
        assert_eq!(&storage.texels[8..16], &[1, 2, 3, 0, 4, 5, 6, 0]);
        assert!(storage.texels[..8].iter().all(|&v| v == 0));
    }

    #[test]
    fn test_unsupported_layout_is_rejected_by_cpu_factory() {
        let factory = CpuTextureFactory::new();
        assert!(factory.create_texture(4, 32, TexelType::UnsignedByte).is_err());
        assert!(factory.storages().is_empty());
    }
}
