use std::num::NonZeroUsize;

use blake3::Hash;
use lru::LruCache;

use crate::parse::{parse, ParseData};
use crate::profile::Profile;
use crate::types::SamplerType;
use crate::TranslateOptions;

/// Entries kept before the least recently used translation is dropped.
const SHADER_CACHE_CAPACITY: NonZeroUsize = match NonZeroUsize::new(256) {
    Some(n) => n,
    None => unreachable!(),
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderCacheLookupSource {
    /// The shader was already present in the in-memory cache.
    Memory,
    /// The translator ran and the output was inserted into the in-memory cache.
    Translated,
}

#[derive(Debug, Clone, Copy)]
pub struct ShaderCacheLookup<'a> {
    pub source: ShaderCacheLookupSource,
    shader: &'a ParseData,
}

impl std::ops::Deref for ShaderCacheLookup<'_> {
    type Target = ParseData;

    fn deref(&self) -> &Self::Target {
        self.shader
    }
}

/// Memoizes [`parse`] by bytecode, profile and translation options.
///
/// Effects frequently embed the same shader blob in several passes; translation is pure, so a
/// repeat lookup returns the earlier result.
pub struct ShaderCache {
    map: LruCache<Hash, ParseData>,
}

fn cache_key(profile: Profile, bytes: &[u8], options: &TranslateOptions) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(profile.name().as_bytes());
    hasher.update(&[0]);
    hasher.update(options.mainfn.as_bytes());
    hasher.update(&[0]);
    for s in &options.swizzles {
        hasher.update(s.usage.name().as_bytes());
        hasher.update(&s.index.to_le_bytes());
        hasher.update(&s.swizzles);
    }
    hasher.update(&[0]);
    for m in &options.sampler_map {
        let ty = match m.ty {
            SamplerType::TwoD => 0u8,
            SamplerType::Cube => 1,
            SamplerType::Volume => 2,
        };
        hasher.update(&m.index.to_le_bytes());
        hasher.update(&[ty]);
    }
    hasher.update(&[0]);
    hasher.update(bytes);
    hasher.finalize()
}

impl ShaderCache {
    pub fn new() -> Self {
        Self::with_capacity(SHADER_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            map: LruCache::new(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    pub fn get_or_translate(
        &mut self,
        profile: Profile,
        bytes: &[u8],
        options: &TranslateOptions,
    ) -> ShaderCacheLookup<'_> {
        let key = cache_key(profile, bytes, options);
        let source = if self.map.contains(&key) {
            ShaderCacheLookupSource::Memory
        } else {
            ShaderCacheLookupSource::Translated
        };
        let shader = self
            .map
            .get_or_insert(key, || parse(profile, bytes, options));
        ShaderCacheLookup { source, shader }
    }
}

impl Default for ShaderCache {
    fn default() -> Self {
        Self::new()
    }
}
