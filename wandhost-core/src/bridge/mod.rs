//! Shared memory bridge.
//!
//! Aliases the guest's four shared buffers (palette, pixels, inputs, audio chunk) inside its
//! linear memory. The bridge stores offsets and lengths only and never copies.
//!
//! Guest memory may be relocated whenever it grows, so every [`View`] remembers the memory
//! *generation* it was bound against. [`MemoryBridge::notify_growth`] bumps the generation and
//! drops all cached views; resolving a view from an older generation fails with
//! [`BridgeError::StaleView`]. Host code goes through [`SharedMemory`], which rebinds all four
//! views together before handing out slices.

use crate::abi::{self, COLOR_COUNT, PIXEL_BUFFER_H, PIXEL_BUFFER_W, SOUND_SAMPLES_PER_CHUNK, layout};
use thiserror::Error;

/// One of the four shared regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    Palette,
    Pixels,
    Inputs,
    SoundChunk,
}

impl Region {
    pub const ALL: [Region; 4] = [
        Region::Palette,
        Region::Pixels,
        Region::Inputs,
        Region::SoundChunk,
    ];

    /// Byte length of the region, fixed by the ABI.
    pub const fn byte_len(self) -> usize {
        match self {
            Region::Palette => layout::PALETTE_BYTES,
            Region::Pixels => layout::PIXELS_BYTES,
            Region::Inputs => layout::INPUTS_BYTES,
            Region::SoundChunk => layout::SOUND_CHUNK_BYTES,
        }
    }

    const fn index(self) -> usize {
        match self {
            Region::Palette => 0,
            Region::Pixels => 1,
            Region::Inputs => 2,
            Region::SoundChunk => 3,
        }
    }
}

impl core::fmt::Display for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Region::Palette => "palette",
            Region::Pixels => "pixel buffer",
            Region::Inputs => "input vector",
            Region::SoundChunk => "audio chunk",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("{region} view [{offset}, +{len}) exceeds guest memory of {memory_len} bytes")]
    OutOfBounds {
        region: Region,
        offset: usize,
        len: usize,
        memory_len: usize,
    },
    #[error("{region} view from memory generation {view} used at generation {current}")]
    StaleView {
        region: Region,
        view: u64,
        current: u64,
    },
    #[error("guest has not shared its memory regions")]
    NotShared,
    #[error("{region} bound at [{offset}, +{len}) but registered at offset {registered}")]
    Mismatch {
        region: Region,
        offset: usize,
        len: usize,
        registered: usize,
    },
}

/// Offsets (guest addresses) of the shared regions, as passed to `share_memory_`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRegions {
    pub palette: u32,
    pub pixels: u32,
    pub inputs: u32,
    pub sound_chunk: u32,
}

impl SharedRegions {
    pub fn offset(&self, region: Region) -> usize {
        let offset = match region {
            Region::Palette => self.palette,
            Region::Pixels => self.pixels,
            Region::Inputs => self.inputs,
            Region::SoundChunk => self.sound_chunk,
        };
        offset as usize
    }
}

/// A bounds-checked alias into guest memory, valid for one memory generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct View {
    region: Region,
    offset: usize,
    len: usize,
    generation: u64,
}

impl View {
    pub fn region(&self) -> Region {
        self.region
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn check(&self, bridge: &MemoryBridge, memory_len: usize) -> Result<(), BridgeError> {
        if self.generation != bridge.generation {
            return Err(BridgeError::StaleView {
                region: self.region,
                view: self.generation,
                current: bridge.generation,
            });
        }
        check_bounds(self.region, self.offset, self.len, memory_len)
    }

    /// Resolve the view against the current memory.
    pub fn slice<'m>(&self, bridge: &MemoryBridge, memory: &'m [u8]) -> Result<&'m [u8], BridgeError> {
        self.check(bridge, memory.len())?;
        Ok(&memory[self.offset..self.offset + self.len])
    }

    /// Resolve the view mutably against the current memory.
    pub fn slice_mut<'m>(
        &self,
        bridge: &MemoryBridge,
        memory: &'m mut [u8],
    ) -> Result<&'m mut [u8], BridgeError> {
        self.check(bridge, memory.len())?;
        Ok(&mut memory[self.offset..self.offset + self.len])
    }
}

fn check_all(regions: SharedRegions, memory_len: usize) -> Result<(), BridgeError> {
    Region::ALL.into_iter().try_for_each(|region| {
        check_bounds(region, regions.offset(region), region.byte_len(), memory_len)
    })
}

fn check_bounds(region: Region, offset: usize, len: usize, memory_len: usize) -> Result<(), BridgeError> {
    match offset.checked_add(len) {
        Some(end) if end <= memory_len => Ok(()),
        _ => Err(BridgeError::OutOfBounds {
            region,
            offset,
            len,
            memory_len,
        }),
    }
}

/// Host-side owner of the region offsets and the cached views.
#[derive(Debug, Default)]
pub struct MemoryBridge {
    generation: u64,
    regions: Option<SharedRegions>,
    views: [Option<View>; 4],
}

impl MemoryBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current memory generation. Bumped on every growth notification.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn regions(&self) -> Option<SharedRegions> {
        self.regions
    }

    pub fn is_shared(&self) -> bool {
        self.regions.is_some()
    }

    /// True when regions are registered but at least one view has been invalidated.
    pub fn is_stale(&self) -> bool {
        self.regions.is_some() && self.views.iter().any(Option::is_none)
    }

    /// Bind one registered region against memory of `memory_len` bytes and cache the view.
    ///
    /// `offset` and `len` must match what the guest registered for `region`.
    pub fn bind(
        &mut self,
        region: Region,
        offset: usize,
        len: usize,
        memory_len: usize,
    ) -> Result<View, BridgeError> {
        let regions = self.regions.ok_or(BridgeError::NotShared)?;
        let registered = regions.offset(region);
        if offset != registered || len != region.byte_len() {
            return Err(BridgeError::Mismatch {
                region,
                offset,
                len,
                registered,
            });
        }
        check_bounds(region, offset, len, memory_len)?;
        let view = View {
            region,
            offset,
            len,
            generation: self.generation,
        };
        self.views[region.index()] = Some(view);
        Ok(view)
    }

    /// Record the guest's region offsets and bind all four views.
    ///
    /// On failure nothing is registered.
    pub fn register(&mut self, regions: SharedRegions, memory_len: usize) -> Result<(), BridgeError> {
        check_all(regions, memory_len)?;
        self.regions = Some(regions);
        self.bind_all(regions, memory_len)?;
        log::debug!(
            "shared regions registered at generation {}: {regions:?}",
            self.generation
        );
        Ok(())
    }

    /// Guest memory grew (or is about to): every cached view is now invalid.
    pub fn notify_growth(&mut self) {
        self.generation += 1;
        self.views = [None; 4];
        log::debug!("guest memory growth, bridge generation now {}", self.generation);
    }

    /// Re-derive all four views from the registered offsets. All or nothing.
    pub fn rebind_all(&mut self, memory_len: usize) -> Result<(), BridgeError> {
        let regions = self.regions.ok_or(BridgeError::NotShared)?;
        check_all(regions, memory_len)?;
        self.bind_all(regions, memory_len)
    }

    /// Callers check all four bounds first, so a failure here caches nothing new.
    fn bind_all(&mut self, regions: SharedRegions, memory_len: usize) -> Result<(), BridgeError> {
        for region in Region::ALL {
            self.bind(region, regions.offset(region), region.byte_len(), memory_len)?;
        }
        Ok(())
    }

    /// Cached view for `region`, if it is bound for the current generation.
    pub fn view(&self, region: Region) -> Result<View, BridgeError> {
        if self.regions.is_none() {
            return Err(BridgeError::NotShared);
        }
        self.views[region.index()].ok_or(BridgeError::StaleView {
            region,
            view: self.generation.saturating_sub(1),
            current: self.generation,
        })
    }
}

/// Borrow of the bridge together with the guest memory it describes.
///
/// This is what the frame loop components use: every accessor rebinds stale views first, so
/// a view never outlives the memory generation it was created against.
pub struct SharedMemory<'a> {
    bridge: &'a mut MemoryBridge,
    memory: &'a mut [u8],
}

impl<'a> SharedMemory<'a> {
    pub fn new(bridge: &'a mut MemoryBridge, memory: &'a mut [u8]) -> Self {
        Self { bridge, memory }
    }

    pub fn generation(&self) -> u64 {
        self.bridge.generation()
    }

    fn refresh(&mut self, region: Region) -> Result<View, BridgeError> {
        if self.bridge.is_stale() {
            self.bridge.rebind_all(self.memory.len())?;
            log::debug!(
                "rebound shared views at generation {} ({} bytes of guest memory)",
                self.bridge.generation(),
                self.memory.len()
            );
        }
        self.bridge.view(region)
    }

    pub fn palette(&mut self) -> Result<PaletteView<'_>, BridgeError> {
        let view = self.refresh(Region::Palette)?;
        view.slice(self.bridge, self.memory).map(PaletteView)
    }

    pub fn pixels(&mut self) -> Result<PixelView<'_>, BridgeError> {
        let view = self.refresh(Region::Pixels)?;
        view.slice(self.bridge, self.memory).map(PixelView)
    }

    pub fn inputs_mut(&mut self) -> Result<&mut [u8], BridgeError> {
        let view = self.refresh(Region::Inputs)?;
        view.slice_mut(self.bridge, self.memory)
    }

    pub fn sound_chunk(&mut self) -> Result<AudioChunkView<'_>, BridgeError> {
        let view = self.refresh(Region::SoundChunk)?;
        view.slice(self.bridge, self.memory).map(AudioChunkView)
    }
}

#[inline]
fn f32_at(bytes: &[u8], index: usize) -> f32 {
    let at = index * 4;
    f32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Palette bytes: `COLOR_COUNT` packed little-endian `[f32; 3]`.
#[derive(Debug, Clone, Copy)]
pub struct PaletteView<'m>(&'m [u8]);

impl<'m> PaletteView<'m> {
    /// Wrap raw palette bytes. `bytes` must be exactly [`layout::PALETTE_BYTES`] long.
    pub fn from_bytes(bytes: &'m [u8]) -> Option<Self> {
        (bytes.len() == layout::PALETTE_BYTES).then_some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &'m [u8] {
        self.0
    }

    pub fn color(&self, index: usize) -> Option<[f32; 3]> {
        if index >= COLOR_COUNT {
            return None;
        }
        let base = index * 3;
        Some([
            f32_at(self.0, base),
            f32_at(self.0, base + 1),
            f32_at(self.0, base + 2),
        ])
    }

    /// All channels as a flat `R,G,B,R,G,B,...` array.
    pub fn to_floats(&self) -> [f32; COLOR_COUNT * 3] {
        let mut out = [0.0; COLOR_COUNT * 3];
        for (i, value) in out.iter_mut().enumerate() {
            *value = f32_at(self.0, i);
        }
        out
    }
}

/// Pixel bytes: `PIXEL_BUFFER_W * PIXEL_BUFFER_H` palette indices, row 0 at the bottom.
#[derive(Debug, Clone, Copy)]
pub struct PixelView<'m>(&'m [u8]);

impl<'m> PixelView<'m> {
    pub fn from_bytes(bytes: &'m [u8]) -> Option<Self> {
        (bytes.len() == layout::PIXELS_BYTES).then_some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &'m [u8] {
        self.0
    }

    /// Row `y`, counted from the bottom. `None` past the last row.
    pub fn row(&self, y: usize) -> Option<&'m [u8]> {
        let start = y.checked_mul(PIXEL_BUFFER_W)?;
        self.0.get(start..start.checked_add(PIXEL_BUFFER_W)?)
    }

    pub const fn width(&self) -> usize {
        PIXEL_BUFFER_W
    }

    pub const fn height(&self) -> usize {
        PIXEL_BUFFER_H
    }
}

/// Audio chunk bytes: `SOUND_SAMPLES_PER_CHUNK` interleaved little-endian `f32` `L,R` frames.
#[derive(Debug, Clone, Copy)]
pub struct AudioChunkView<'m>(&'m [u8]);

impl<'m> AudioChunkView<'m> {
    pub fn frames(&self) -> usize {
        SOUND_SAMPLES_PER_CHUNK
    }

    /// `(left, right)` of frame `i`.
    pub fn frame(&self, i: usize) -> (f32, f32) {
        let base = i * abi::SOUND_CHANNELS;
        (f32_at(self.0, base), f32_at(self.0, base + 1))
    }

    pub fn iter(&self) -> impl Iterator<Item = (f32, f32)> + '_ {
        (0..self.frames()).map(|i| self.frame(i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGIONS: SharedRegions = SharedRegions {
        palette: 64,
        pixels: 1024,
        inputs: 100_000,
        sound_chunk: 100_016,
    };
    const MEMORY_LEN: usize = 2 * 65_536;

    fn write_f32(memory: &mut [u8], at: usize, value: f32) {
        memory[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    #[test]
    fn bind_requires_registration() {
        let mut bridge = MemoryBridge::new();
        assert_eq!(
            bridge.bind(Region::Inputs, 100_000, layout::INPUTS_BYTES, MEMORY_LEN),
            Err(BridgeError::NotShared)
        );
    }

    #[test]
    fn bind_rejects_offsets_other_than_the_registered_ones() {
        let mut bridge = MemoryBridge::new();
        bridge.register(REGIONS, MEMORY_LEN).unwrap();
        let before = bridge.view(Region::Inputs).unwrap();

        assert_eq!(
            bridge.bind(Region::Inputs, 10, layout::INPUTS_BYTES, MEMORY_LEN),
            Err(BridgeError::Mismatch {
                region: Region::Inputs,
                offset: 10,
                len: layout::INPUTS_BYTES,
                registered: 100_000,
            })
        );
        assert!(matches!(
            bridge.bind(Region::Inputs, 100_000, 1, MEMORY_LEN),
            Err(BridgeError::Mismatch { .. })
        ));
        assert_eq!(bridge.view(Region::Inputs), Ok(before));
    }

    #[test]
    fn bind_rejects_out_of_bounds() {
        let mut bridge = MemoryBridge::new();
        bridge.register(REGIONS, MEMORY_LEN).unwrap();
        assert!(bridge.bind(Region::Inputs, 100_000, layout::INPUTS_BYTES, 100_011).is_ok());
        assert_eq!(
            bridge.bind(Region::Inputs, 100_000, layout::INPUTS_BYTES, 100_010),
            Err(BridgeError::OutOfBounds {
                region: Region::Inputs,
                offset: 100_000,
                len: layout::INPUTS_BYTES,
                memory_len: 100_010,
            })
        );
    }

    #[test]
    fn rows_are_bounds_checked() {
        let mut bytes = vec![0u8; layout::PIXELS_BYTES];
        bytes[PIXEL_BUFFER_W] = 5;
        let pixels = PixelView::from_bytes(&bytes).unwrap();
        assert_eq!(pixels.row(1).map(|row| row[0]), Some(5));
        assert_eq!(pixels.row(PIXEL_BUFFER_H - 1).map(<[u8]>::len), Some(PIXEL_BUFFER_W));
        assert_eq!(pixels.row(PIXEL_BUFFER_H), None);
        assert_eq!(pixels.row(usize::MAX), None);
    }

    #[test]
    fn register_is_all_or_nothing() {
        let mut bridge = MemoryBridge::new();
        let bad = SharedRegions {
            sound_chunk: (MEMORY_LEN - 8) as u32,
            ..REGIONS
        };
        assert!(matches!(
            bridge.register(bad, MEMORY_LEN),
            Err(BridgeError::OutOfBounds {
                region: Region::SoundChunk,
                ..
            })
        ));
        assert!(!bridge.is_shared());
        assert_eq!(bridge.view(Region::Palette), Err(BridgeError::NotShared));
    }

    #[test]
    fn accessors_fail_before_share() {
        let mut bridge = MemoryBridge::new();
        let mut memory = vec![0u8; MEMORY_LEN];
        let mut shared = SharedMemory::new(&mut bridge, &mut memory);
        assert!(matches!(shared.palette(), Err(BridgeError::NotShared)));
    }

    #[test]
    fn stale_view_fails_fast_after_growth() {
        let mut bridge = MemoryBridge::new();
        let memory = vec![0u8; MEMORY_LEN];
        bridge.register(REGIONS, memory.len()).unwrap();
        let view = bridge.view(Region::Palette).unwrap();

        bridge.notify_growth();
        assert!(bridge.is_stale());
        assert!(matches!(
            view.slice(&bridge, &memory),
            Err(BridgeError::StaleView {
                region: Region::Palette,
                view: 0,
                current: 1,
            })
        ));
        assert!(matches!(
            bridge.view(Region::Palette),
            Err(BridgeError::StaleView { .. })
        ));
    }

    #[test]
    fn growth_round_trip_preserves_contents() {
        let mut bridge = MemoryBridge::new();
        let mut memory = vec![0u8; MEMORY_LEN];
        write_f32(&mut memory, 64, 0.25);
        write_f32(&mut memory, 64 + 4 * 95, 1.0);
        memory[1024] = 7;
        memory[1024 + layout::PIXELS_BYTES - 1] = 31;
        bridge.register(REGIONS, memory.len()).unwrap();

        let (before_palette, before_pixels) = {
            let mut shared = SharedMemory::new(&mut bridge, &mut memory);
            let palette = shared.palette().unwrap().to_floats();
            let pixels = shared.pixels().unwrap().as_bytes().to_vec();
            (palette, pixels)
        };

        // Growing a Vec past its capacity relocates it, like a wasm memory.grow may.
        let mut grown = Vec::with_capacity(MEMORY_LEN * 2);
        grown.extend_from_slice(&memory);
        grown.resize(MEMORY_LEN * 2, 0);
        drop(memory);
        bridge.notify_growth();

        let mut shared = SharedMemory::new(&mut bridge, &mut grown);
        assert_eq!(shared.palette().unwrap().to_floats(), before_palette);
        assert_eq!(shared.pixels().unwrap().as_bytes(), &before_pixels[..]);
        assert_eq!(shared.generation(), 1);
        assert!(!bridge.is_stale());
        assert_eq!(bridge.view(Region::Inputs).unwrap().generation(), 1);
    }

    #[test]
    fn palette_decodes_rgb_triples() {
        let mut bytes = vec![0u8; layout::PALETTE_BYTES];
        write_f32(&mut bytes, 12, 0.5);
        write_f32(&mut bytes, 16, 0.25);
        write_f32(&mut bytes, 20, 1.0);
        let palette = PaletteView::from_bytes(&bytes).unwrap();
        assert_eq!(palette.color(1), Some([0.5, 0.25, 1.0]));
        assert_eq!(palette.color(COLOR_COUNT), None);
        assert!(PaletteView::from_bytes(&bytes[1..]).is_none());
    }

    #[test]
    fn inputs_are_writable_through_shared_memory() {
        let mut bridge = MemoryBridge::new();
        let mut memory = vec![0u8; MEMORY_LEN];
        bridge.register(REGIONS, memory.len()).unwrap();
        {
            let mut shared = SharedMemory::new(&mut bridge, &mut memory);
            shared.inputs_mut().unwrap()[7] = 1;
        }
        assert_eq!(memory[REGIONS.inputs as usize + 7], 1);
    }
}
