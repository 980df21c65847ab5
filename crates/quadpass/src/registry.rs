//! Tagged render targets owned by a context.
//!
//! A [`TargetSpec`] names a target by tag; the first draw that mentions a
//! tag creates it, later draws reuse it and resize it in place when the
//! resolved size changes. A spec with `story(n)` creates a [`StoryBuffer`]
//! of `n` targets that rotates on every write, which is how ping-pong
//! simulations keep their previous states around.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use quadpass_test_utils::GlContext;

use crate::config::PassConfig;
use crate::error::{DrawError, DrawResult};
use crate::format::{PixelData, TargetFormat};
use crate::readback::ReadbackScheduler;
use crate::sampler::{FilterMode, TextureSampler, WrapMode};
use crate::target::{TargetDesc, TextureTarget, data_bytes};

/// Rotating sequence of targets sharing one tag.
///
/// Index 0 is the current state, higher indices are progressively older.
/// Never empty.
#[derive(Clone)]
pub struct StoryBuffer(Rc<RefCell<VecDeque<Rc<TextureTarget>>>>);

impl StoryBuffer {
    pub(crate) fn new(targets: Vec<Rc<TextureTarget>>) -> Self {
        debug_assert!(!targets.is_empty());
        Self(Rc::new(RefCell::new(targets.into())))
    }

    /// The most recently written target.
    pub fn current(&self) -> Rc<TextureTarget> {
        self.0.borrow()[0].clone()
    }

    pub fn get(&self, index: usize) -> Option<Rc<TextureTarget>> {
        self.0.borrow().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    pub fn to_vec(&self) -> Vec<Rc<TextureTarget>> {
        self.0.borrow().iter().cloned().collect()
    }

    /// The target the next write goes to (the oldest one).
    pub fn write_slot(&self) -> Rc<TextureTarget> {
        let slots = self.0.borrow();
        slots[slots.len() - 1].clone()
    }

    /// Move the oldest target to the front and return it.
    pub fn rotate(&self) -> Rc<TextureTarget> {
        let mut slots = self.0.borrow_mut();
        if let Some(last) = slots.pop_back() {
            slots.push_front(last);
        }
        slots[0].clone()
    }

    pub fn ptr_eq(&self, other: &StoryBuffer) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for StoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.borrow().iter()).finish()
    }
}

/// Description of a context-owned target.
///
/// ```
/// use quadpass::{FilterMode, TargetSpec};
///
/// let spec = TargetSpec::new("state")
///     .size(256, 256)
///     .format("rgba16f")
///     .filter(FilterMode::Linear)
///     .story(2);
/// assert_eq!(spec.resolve_size((800, 600)), [256, 256]);
/// ```
#[derive(Debug, Clone)]
pub struct TargetSpec {
    pub tag: String,
    pub size: Option<[u32; 2]>,
    /// Dimensions of an external source, used when `size` is absent
    pub source_size: Option<[u32; 2]>,
    pub scale: f32,
    pub format: Option<String>,
    pub filter: Option<FilterMode>,
    pub wrap: Option<WrapMode>,
    pub layers: Option<u32>,
    pub story: Option<usize>,
    pub data: Option<PixelData>,
    pub depth: Option<Rc<TextureTarget>>,
}

impl TargetSpec {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            size: None,
            source_size: None,
            scale: 1.0,
            format: None,
            filter: None,
            wrap: None,
            layers: None,
            story: None,
            data: None,
            depth: None,
        }
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = Some([width, height]);
        self
    }

    pub fn source_size(mut self, width: u32, height: u32) -> Self {
        self.source_size = Some([width, height]);
        self
    }

    pub fn scale(mut self, scale: f32) -> Self {
        self.scale = scale;
        self
    }

    /// Format name such as `"r32f"` or `"rgba8+depth"`.
    pub fn format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn filter(mut self, filter: FilterMode) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn wrap(mut self, wrap: WrapMode) -> Self {
        self.wrap = Some(wrap);
        self
    }

    /// Layered (2D array) storage with one colour attachment per layer.
    pub fn layers(mut self, layers: u32) -> Self {
        self.layers = Some(layers);
        self
    }

    pub fn story(mut self, count: usize) -> Self {
        self.story = Some(count);
        self
    }

    pub fn data(mut self, data: impl Into<PixelData>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Attach a caller-owned depth target.
    pub fn depth(mut self, depth: &Rc<TextureTarget>) -> Self {
        self.depth = Some(depth.clone());
        self
    }

    /// `ceil(base * scale)` per axis, where base is the explicit size, the
    /// source size or the drawing buffer, in that order.
    pub fn resolve_size(&self, drawing_buffer: (u32, u32)) -> [u32; 2] {
        let [w, h] = self
            .size
            .or(self.source_size)
            .unwrap_or([drawing_buffer.0, drawing_buffer.1]);
        let scale = self.scale as f64;
        [(w as f64 * scale).ceil() as u32, (h as f64 * scale).ceil() as u32]
    }
}

/// Where a draw goes.
#[derive(Debug, Clone, Default)]
pub enum Target {
    /// The default framebuffer
    #[default]
    Default,
    /// A context-owned target, created on demand
    Spec(TargetSpec),
    /// A caller-held target
    Texture(Rc<TextureTarget>),
    /// A caller-held story, rotated by the draw
    Story(StoryBuffer),
}

impl From<TargetSpec> for Target {
    fn from(spec: TargetSpec) -> Self {
        Target::Spec(spec)
    }
}

impl From<Rc<TextureTarget>> for Target {
    fn from(target: Rc<TextureTarget>) -> Self {
        Target::Texture(target)
    }
}

impl From<&Rc<TextureTarget>> for Target {
    fn from(target: &Rc<TextureTarget>) -> Self {
        Target::Texture(target.clone())
    }
}

impl From<StoryBuffer> for Target {
    fn from(story: StoryBuffer) -> Self {
        Target::Story(story)
    }
}

impl From<&StoryBuffer> for Target {
    fn from(story: &StoryBuffer) -> Self {
        Target::Story(story.clone())
    }
}

impl From<ResolvedTarget> for Target {
    fn from(resolved: ResolvedTarget) -> Self {
        match resolved {
            ResolvedTarget::Default => Target::Default,
            ResolvedTarget::Texture(t) => Target::Texture(t),
            ResolvedTarget::Story(s) => Target::Story(s),
        }
    }
}

/// What a draw actually rendered into.
#[derive(Debug, Clone)]
pub enum ResolvedTarget {
    Default,
    Texture(Rc<TextureTarget>),
    Story(StoryBuffer),
}

impl ResolvedTarget {
    /// The single target, or a story's current slot.
    pub fn texture(&self) -> Option<Rc<TextureTarget>> {
        match self {
            ResolvedTarget::Default => None,
            ResolvedTarget::Texture(t) => Some(t.clone()),
            ResolvedTarget::Story(s) => Some(s.current()),
        }
    }

    pub fn story(&self) -> Option<&StoryBuffer> {
        match self {
            ResolvedTarget::Story(s) => Some(s),
            _ => None,
        }
    }

    /// Default sampler of [`texture`](Self::texture).
    pub fn sampler(&self) -> Option<TextureSampler> {
        self.texture().map(|t| t.sampler())
    }
}

#[derive(Clone)]
enum Entry {
    Single(Rc<TextureTarget>),
    Story(StoryBuffer),
}

impl Entry {
    fn resolved(&self) -> ResolvedTarget {
        match self {
            Entry::Single(t) => ResolvedTarget::Texture(t.clone()),
            Entry::Story(s) => ResolvedTarget::Story(s.clone()),
        }
    }

    fn write_slot(&self) -> Rc<TextureTarget> {
        match self {
            Entry::Single(t) => t.clone(),
            Entry::Story(s) => s.write_slot(),
        }
    }
}

/// Context-owned targets by tag.
pub struct TargetRegistry {
    gl: Rc<dyn GlContext>,
    readback: Rc<ReadbackScheduler>,
    config: PassConfig,
    entries: IndexMap<String, Entry>,
}

impl TargetRegistry {
    pub fn new(gl: Rc<dyn GlContext>, readback: Rc<ReadbackScheduler>, config: PassConfig) -> Self {
        Self {
            gl,
            readback,
            config,
            entries: IndexMap::new(),
        }
    }

    /// Create, resize or re-upload the target named by `spec`.
    ///
    /// Only the write slot (a story's oldest target) is compared against the
    /// resolved size; the other slots catch up as the story rotates.
    pub fn prepare(&mut self, spec: &TargetSpec) -> DrawResult<ResolvedTarget> {
        if spec.tag.is_empty() {
            return Err(DrawError::MissingTag);
        }
        let format: TargetFormat = match &spec.format {
            Some(name) => name.parse()?,
            None => TargetFormat {
                color: self.config.default_format,
                with_depth: false,
            },
        };
        let size = spec.resolve_size(self.gl.drawing_buffer_size());
        if let Some(data) = &spec.data {
            let expected = data_bytes(&format.color.info(), size, spec.layers);
            let actual = data.as_bytes().len();
            if expected != actual {
                return Err(DrawError::DataSizeMismatch {
                    tag: spec.tag.clone(),
                    expected,
                    actual,
                });
            }
        }

        if let Some(entry) = self.entries.get(&spec.tag) {
            let slot = entry.write_slot();
            let need_resize = slot.size() != size;
            if need_resize {
                tracing::info!(tag = %spec.tag, from = ?slot.size(), to = ?size, "resizing target");
            }
            if need_resize || spec.data.is_some() {
                slot.update(size, spec.data.as_ref())?;
            }
            return Ok(entry.resolved());
        }

        let desc = TargetDesc {
            tag: &spec.tag,
            size,
            format: format.color,
            filter: spec.filter.unwrap_or(self.config.default_filter),
            wrap: spec.wrap.unwrap_or(self.config.default_wrap),
            layers: spec.layers,
            data: spec.data.as_ref(),
            with_depth: format.with_depth,
            depth: spec.depth.clone(),
        };
        let entry = match spec.story {
            Some(count) if count > 0 => {
                let targets = (0..count)
                    .map(|_| self.create(desc.clone()).map(Rc::new))
                    .collect::<DrawResult<Vec<_>>>()?;
                Entry::Story(StoryBuffer::new(targets))
            }
            _ => Entry::Single(Rc::new(self.create(desc)?)),
        };
        tracing::info!(
            tag = %spec.tag,
            format = %format.color,
            ?size,
            story = spec.story.unwrap_or(0),
            "created target"
        );
        let resolved = entry.resolved();
        self.entries.insert(spec.tag.clone(), entry);
        Ok(resolved)
    }

    fn create(&self, desc: TargetDesc<'_>) -> DrawResult<TextureTarget> {
        TextureTarget::new(
            self.gl.clone(),
            self.readback.clone(),
            self.config.readback_pool_limit,
            desc,
        )
    }

    pub fn get(&self, tag: &str) -> Option<ResolvedTarget> {
        self.entries.get(tag).map(Entry::resolved)
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Free every target and forget every tag.
    pub fn free_all(&mut self) {
        for (_, entry) in self.entries.drain(..) {
            match entry {
                Entry::Single(t) => t.free(),
                Entry::Story(s) => s.to_vec().iter().for_each(|t| t.free()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadpass_test_utils::MockGlContext;
    use std::time::Duration;

    fn registry(mock: &Rc<MockGlContext>) -> TargetRegistry {
        let scheduler = Rc::new(ReadbackScheduler::new(mock.clone(), Duration::ZERO));
        TargetRegistry::new(mock.clone(), scheduler, PassConfig::default())
    }

    #[test]
    fn size_resolution() {
        let spec = TargetSpec::new("a");
        assert_eq!(spec.resolve_size((640, 480)), [640, 480]);
        assert_eq!(spec.clone().scale(0.5).resolve_size((641, 480)), [321, 240]);
        assert_eq!(spec.clone().source_size(30, 20).resolve_size((640, 480)), [30, 20]);
        assert_eq!(spec.source_size(30, 20).size(3, 2).resolve_size((640, 480)), [3, 2]);
    }

    #[test]
    fn missing_tag_and_bad_format() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut reg = registry(&mock);
        assert_eq!(reg.prepare(&TargetSpec::new("")).unwrap_err(), DrawError::MissingTag);
        assert_eq!(
            reg.prepare(&TargetSpec::new("a").format("rgba7")).unwrap_err(),
            DrawError::UnknownFormat("rgba7".into())
        );
        assert_eq!(mock.count_texture_creates(), 0);
    }

    #[test]
    fn created_once_resized_in_place() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut reg = registry(&mock);
        let first = reg.prepare(&TargetSpec::new("a")).unwrap().texture().unwrap();
        assert_eq!(first.size(), [4, 4]);
        let again = reg.prepare(&TargetSpec::new("a").size(8, 2)).unwrap().texture().unwrap();
        assert!(Rc::ptr_eq(&first, &again));
        assert_eq!(first.size(), [8, 2]);
        assert_eq!(mock.count_texture_creates(), 1);
        assert_eq!(mock.texture_size(first.texture()), Some((8, 2, 1)));
    }

    #[test]
    fn story_creates_n_targets_and_resizes_write_slot() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut reg = registry(&mock);
        let spec = TargetSpec::new("s").size(2, 2).story(3);
        let story = reg.prepare(&spec).unwrap().story().unwrap().clone();
        assert_eq!(story.len(), 3);
        assert_eq!(mock.count_texture_creates(), 3);

        reg.prepare(&spec.clone().size(6, 6)).unwrap();
        let sizes: Vec<_> = story.to_vec().iter().map(|t| t.size()).collect();
        assert_eq!(sizes, [[2, 2], [2, 2], [6, 6]]);
    }

    #[test]
    fn rotation_is_a_cyclic_permutation() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut reg = registry(&mock);
        let story = reg
            .prepare(&TargetSpec::new("s").size(1, 1).story(3))
            .unwrap()
            .story()
            .unwrap()
            .clone();
        let before = story.to_vec();
        let written = story.rotate();
        let after = story.to_vec();
        assert!(Rc::ptr_eq(&written, &before[2]));
        assert!(Rc::ptr_eq(&after[0], &before[2]));
        assert!(Rc::ptr_eq(&after[1], &before[0]));
        assert!(Rc::ptr_eq(&after[2], &before[1]));
        assert!(Rc::ptr_eq(&story.current(), &written));
    }

    #[test]
    fn data_is_validated_before_creation() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut reg = registry(&mock);
        let spec = TargetSpec::new("d").size(2, 1).format("r32f").data(vec![1.0f32]);
        assert!(matches!(
            reg.prepare(&spec).unwrap_err(),
            DrawError::DataSizeMismatch { expected: 8, actual: 4, .. }
        ));
        assert!(reg.is_empty());

        let spec = TargetSpec::new("d").size(2, 1).format("r32f").data(vec![1.0f32, 2.0]);
        let t = reg.prepare(&spec).unwrap().texture().unwrap();
        assert_eq!(mock.texel(t.texture(), 1, 0, 0), Some([2.0, 0.0, 0.0, 1.0]));
    }

    #[test]
    fn free_all_forgets_everything() {
        let mock = Rc::new(MockGlContext::new(4, 4));
        let mut reg = registry(&mock);
        let a = reg.prepare(&TargetSpec::new("a").format("rgba8+depth")).unwrap();
        reg.prepare(&TargetSpec::new("b").story(2)).unwrap();
        assert_eq!(reg.tags().collect::<Vec<_>>(), ["a", "b"]);
        reg.free_all();
        assert!(reg.get("a").is_none());
        assert!(a.texture().unwrap().is_freed());
        assert_eq!(mock.live_textures(), 0);
    }
}
