//! Pipeline state descriptions
//!
//! Every fixed-function block is a plain value type with `Eq` and `Hash`, so a
//! complete [`PipelineStateDescription`] can key a cache. Fields that would be
//! floating point on a native API (depth bias) are stored as integers.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bitflags::bitflags;

use crate::render::effect::EffectBytecodeId;

/// Maximum number of simultaneously bound render targets
pub const MAX_RENDER_TARGETS: usize = 8;

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    /// 0
    Zero,
    /// 1
    One,
    /// Source colour
    SourceColor,
    /// 1 - source colour
    InverseSourceColor,
    /// Source alpha
    SourceAlpha,
    /// 1 - source alpha
    InverseSourceAlpha,
    /// Destination alpha
    DestinationAlpha,
    /// 1 - destination alpha
    InverseDestinationAlpha,
    /// Destination colour
    DestinationColor,
    /// 1 - destination colour
    InverseDestinationColor,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFunction {
    /// source + destination
    Add,
    /// source - destination
    Subtract,
    /// destination - source
    ReverseSubtract,
    /// min(source, destination)
    Min,
    /// max(source, destination)
    Max,
}

bitflags! {
    /// Colour channels written by a render target
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ColorWriteChannels: u8 {
        /// Red
        const RED = 1 << 0;
        /// Green
        const GREEN = 1 << 1;
        /// Blue
        const BLUE = 1 << 2;
        /// Alpha
        const ALPHA = 1 << 3;
        /// All channels
        const ALL = Self::RED.bits() | Self::GREEN.bits() | Self::BLUE.bits() | Self::ALPHA.bits();
    }
}

/// Blending of one render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateRenderTargetDescription {
    /// Whether blending is enabled
    pub blend_enable: bool,
    /// Colour source factor
    pub color_source_blend: Blend,
    /// Colour destination factor
    pub color_destination_blend: Blend,
    /// Colour operation
    pub color_blend_function: BlendFunction,
    /// Alpha source factor
    pub alpha_source_blend: Blend,
    /// Alpha destination factor
    pub alpha_destination_blend: Blend,
    /// Alpha operation
    pub alpha_blend_function: BlendFunction,
    /// Channels written
    pub color_write_channels: ColorWriteChannels,
}

impl Default for BlendStateRenderTargetDescription {
    fn default() -> Self {
        Self {
            blend_enable: false,
            color_source_blend: Blend::One,
            color_destination_blend: Blend::Zero,
            color_blend_function: BlendFunction::Add,
            alpha_source_blend: Blend::One,
            alpha_destination_blend: Blend::Zero,
            alpha_blend_function: BlendFunction::Add,
            color_write_channels: ColorWriteChannels::ALL,
        }
    }
}

/// Output-merger blending
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendStateDescription {
    /// Alpha-to-coverage multisampling
    pub alpha_to_coverage_enable: bool,
    /// Use one description per render target instead of the first for all
    pub independent_blend_enable: bool,
    /// Per render target blending
    pub render_targets: [BlendStateRenderTargetDescription; MAX_RENDER_TARGETS],
}

impl Default for BlendStateDescription {
    fn default() -> Self {
        Self::opaque()
    }
}

impl BlendStateDescription {
    /// Blending disabled
    pub fn opaque() -> Self {
        Self {
            alpha_to_coverage_enable: false,
            independent_blend_enable: false,
            render_targets: [BlendStateRenderTargetDescription::default(); MAX_RENDER_TARGETS],
        }
    }

    /// Same target description on every render target
    fn uniform(target: BlendStateRenderTargetDescription) -> Self {
        Self {
            render_targets: [target; MAX_RENDER_TARGETS],
            ..Self::opaque()
        }
    }

    /// Straight alpha blending
    pub fn alpha_blend() -> Self {
        Self::uniform(BlendStateRenderTargetDescription {
            blend_enable: true,
            color_source_blend: Blend::SourceAlpha,
            color_destination_blend: Blend::InverseSourceAlpha,
            alpha_source_blend: Blend::One,
            alpha_destination_blend: Blend::InverseSourceAlpha,
            ..BlendStateRenderTargetDescription::default()
        })
    }

    /// Pre-multiplied alpha blending
    pub fn premultiplied() -> Self {
        Self::uniform(BlendStateRenderTargetDescription {
            blend_enable: true,
            color_source_blend: Blend::One,
            color_destination_blend: Blend::InverseSourceAlpha,
            alpha_source_blend: Blend::One,
            alpha_destination_blend: Blend::InverseSourceAlpha,
            ..BlendStateRenderTargetDescription::default()
        })
    }

    /// Additive blending for particles and lights
    pub fn additive() -> Self {
        Self::uniform(BlendStateRenderTargetDescription {
            blend_enable: true,
            color_source_blend: Blend::SourceAlpha,
            color_destination_blend: Blend::One,
            alpha_source_blend: Blend::SourceAlpha,
            alpha_destination_blend: Blend::One,
            ..BlendStateRenderTargetDescription::default()
        })
    }

    /// Multiplicative blending
    pub fn multiply() -> Self {
        Self::uniform(BlendStateRenderTargetDescription {
            blend_enable: true,
            color_source_blend: Blend::DestinationColor,
            color_destination_blend: Blend::Zero,
            alpha_source_blend: Blend::DestinationAlpha,
            alpha_destination_blend: Blend::Zero,
            ..BlendStateRenderTargetDescription::default()
        })
    }

    /// Whether any target blends
    pub fn is_blending(&self) -> bool {
        self.render_targets.iter().any(|target| target.blend_enable)
    }
}

/// Polygon rendering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolygonMode {
    /// Normal solid rendering
    Fill,
    /// Wireframe mode
    Line,
    /// Point cloud mode
    Point,
}

/// Face culling modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    /// No culling
    None,
    /// Cull front faces
    Front,
    /// Cull back faces
    Back,
}

/// Winding of front faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    /// Counter-clockwise triangles face forward
    CounterClockwise,
    /// Clockwise triangles face forward
    Clockwise,
}

/// Rasterizer state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RasterizerStateDescription {
    /// Polygon mode
    pub polygon_mode: PolygonMode,
    /// Culling
    pub cull_mode: CullMode,
    /// Front-face winding
    pub front_face: FrontFace,
    /// Constant depth bias in depth-buffer units
    pub depth_bias: i32,
    /// Clip primitives against the near and far planes
    pub depth_clip_enable: bool,
    /// Scissor test
    pub scissor_test_enable: bool,
    /// Antialiased line rendering
    pub multisample_antialias_line: bool,
}

impl Default for RasterizerStateDescription {
    fn default() -> Self {
        Self::cull_back()
    }
}

impl RasterizerStateDescription {
    /// Solid, back faces culled
    pub const fn cull_back() -> Self {
        Self {
            polygon_mode: PolygonMode::Fill,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            depth_bias: 0,
            depth_clip_enable: true,
            scissor_test_enable: false,
            multisample_antialias_line: false,
        }
    }

    /// Solid, nothing culled
    pub const fn cull_none() -> Self {
        Self {
            cull_mode: CullMode::None,
            ..Self::cull_back()
        }
    }

    /// Wireframe, nothing culled
    pub const fn wireframe() -> Self {
        Self {
            polygon_mode: PolygonMode::Line,
            cull_mode: CullMode::None,
            ..Self::cull_back()
        }
    }
}

/// Depth and stencil comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    /// Never passes
    Never,
    /// new < old
    Less,
    /// new == old
    Equal,
    /// new <= old
    LessEqual,
    /// new > old
    Greater,
    /// new != old
    NotEqual,
    /// new >= old
    GreaterEqual,
    /// Always passes
    Always,
}

/// Stencil buffer update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOperation {
    /// Keep the current value
    Keep,
    /// Set to zero
    Zero,
    /// Replace with the reference value
    Replace,
    /// Increment, clamping
    IncrementSaturation,
    /// Decrement, clamping
    DecrementSaturation,
    /// Bitwise invert
    Invert,
    /// Increment, wrapping
    Increment,
    /// Decrement, wrapping
    Decrement,
}

/// Stencil behaviour of one face orientation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilFaceOperation {
    /// Stencil test failed
    pub stencil_fail: StencilOperation,
    /// Stencil passed, depth failed
    pub stencil_depth_buffer_fail: StencilOperation,
    /// Both passed
    pub stencil_pass: StencilOperation,
    /// Stencil comparison
    pub stencil_function: CompareFunction,
}

impl Default for DepthStencilFaceOperation {
    fn default() -> Self {
        Self {
            stencil_fail: StencilOperation::Keep,
            stencil_depth_buffer_fail: StencilOperation::Keep,
            stencil_pass: StencilOperation::Keep,
            stencil_function: CompareFunction::Always,
        }
    }
}

/// Depth-stencil state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilStateDescription {
    /// Depth test
    pub depth_buffer_enable: bool,
    /// Depth writes
    pub depth_buffer_write_enable: bool,
    /// Depth comparison
    pub depth_buffer_function: CompareFunction,
    /// Stencil test
    pub stencil_enable: bool,
    /// Stencil read mask
    pub stencil_mask: u8,
    /// Stencil write mask
    pub stencil_write_mask: u8,
    /// Front-facing stencil operations
    pub front_face: DepthStencilFaceOperation,
    /// Back-facing stencil operations
    pub back_face: DepthStencilFaceOperation,
}

impl Default for DepthStencilStateDescription {
    fn default() -> Self {
        Self::depth_read_write()
    }
}

impl DepthStencilStateDescription {
    /// Depth test and write
    pub fn depth_read_write() -> Self {
        Self {
            depth_buffer_enable: true,
            depth_buffer_write_enable: true,
            depth_buffer_function: CompareFunction::LessEqual,
            stencil_enable: false,
            stencil_mask: u8::MAX,
            stencil_write_mask: u8::MAX,
            front_face: DepthStencilFaceOperation::default(),
            back_face: DepthStencilFaceOperation::default(),
        }
    }

    /// Depth test without writes
    pub fn depth_read() -> Self {
        Self {
            depth_buffer_write_enable: false,
            ..Self::depth_read_write()
        }
    }

    /// No depth test
    pub fn none() -> Self {
        Self {
            depth_buffer_enable: false,
            depth_buffer_write_enable: false,
            ..Self::depth_read_write()
        }
    }
}

/// Input assembly topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    /// Independent points
    PointList,
    /// Independent lines
    LineList,
    /// Connected lines
    LineStrip,
    /// Independent triangles
    #[default]
    TriangleList,
    /// Connected triangles
    TriangleStrip,
}

/// Texel formats of render outputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// No attachment
    None,
    /// 8-bit RGBA, linear
    R8G8B8A8Unorm,
    /// 8-bit RGBA, sRGB
    R8G8B8A8UnormSrgb,
    /// 8-bit BGRA, linear
    B8G8R8A8Unorm,
    /// 16-bit float RGBA
    R16G16B16A16Float,
    /// Packed 11/11/10 float
    R11G11B10Float,
    /// 24-bit depth, 8-bit stencil
    D24UnormS8Uint,
    /// 32-bit float depth
    D32Float,
}

/// Samples per pixel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum MultisampleCount {
    /// No multisampling
    #[default]
    None,
    /// 2x
    X2,
    /// 4x
    X4,
    /// 8x
    X8,
}

/// Render target layout a stage draws into
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RenderOutputDescription {
    /// Colour attachment formats, at most [`MAX_RENDER_TARGETS`]
    pub render_target_formats: Vec<PixelFormat>,
    /// Depth-stencil attachment format
    pub depth_stencil_format: PixelFormat,
    /// Samples per pixel
    pub multisample_count: MultisampleCount,
}

impl Default for RenderOutputDescription {
    fn default() -> Self {
        Self::new(PixelFormat::R8G8B8A8UnormSrgb, PixelFormat::D24UnormS8Uint)
    }
}

impl RenderOutputDescription {
    /// One colour target plus depth
    pub fn new(color: PixelFormat, depth_stencil: PixelFormat) -> Self {
        Self {
            render_target_formats: vec![color],
            depth_stencil_format: depth_stencil,
            multisample_count: MultisampleCount::None,
        }
    }

    /// Depth only, as used by shadow maps
    pub fn depth_only(depth_stencil: PixelFormat) -> Self {
        Self {
            render_target_formats: Vec::new(),
            depth_stencil_format: depth_stencil,
            multisample_count: MultisampleCount::None,
        }
    }

    /// Set the sample count
    #[must_use]
    pub fn with_multisample(mut self, count: MultisampleCount) -> Self {
        self.multisample_count = count;
        self
    }
}

/// Mutable description a [`PipelineState`] is created from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineStateDescription {
    /// Compiled effect
    pub effect_bytecode: Option<EffectBytecodeId>,
    /// Blending
    pub blend_state: BlendStateDescription,
    /// Coverage mask
    pub sample_mask: u32,
    /// Rasterizer
    pub rasterizer_state: RasterizerStateDescription,
    /// Depth-stencil
    pub depth_stencil_state: DepthStencilStateDescription,
    /// Topology
    pub primitive_type: PrimitiveType,
    /// Render target layout
    pub output: RenderOutputDescription,
}

impl Default for PipelineStateDescription {
    fn default() -> Self {
        Self {
            effect_bytecode: None,
            blend_state: BlendStateDescription::opaque(),
            sample_mask: u32::MAX,
            rasterizer_state: RasterizerStateDescription::cull_back(),
            depth_stencil_state: DepthStencilStateDescription::depth_read_write(),
            primitive_type: PrimitiveType::TriangleList,
            output: RenderOutputDescription::default(),
        }
    }
}

impl PipelineStateDescription {
    /// Opaque geometry: no blending, back-face culling, depth read/write
    pub fn opaque() -> Self {
        Self::default()
    }

    /// Restore every field to the opaque defaults
    pub fn set_defaults(&mut self) {
        *self = Self::default();
    }

    /// Alpha-blended geometry reading but not writing depth
    pub fn alpha_blend() -> Self {
        Self {
            blend_state: BlendStateDescription::alpha_blend(),
            depth_stencil_state: DepthStencilStateDescription::depth_read(),
            ..Self::opaque()
        }
    }

    /// Additive geometry reading but not writing depth
    pub fn additive() -> Self {
        Self {
            blend_state: BlendStateDescription::additive(),
            depth_stencil_state: DepthStencilStateDescription::depth_read(),
            ..Self::opaque()
        }
    }

    /// Opaque geometry without culling
    pub fn cull_none() -> Self {
        Self {
            rasterizer_state: RasterizerStateDescription::cull_none(),
            ..Self::opaque()
        }
    }

    /// Opaque geometry without depth writes
    pub fn depth_read_only() -> Self {
        Self {
            depth_stencil_state: DepthStencilStateDescription::depth_read(),
            ..Self::opaque()
        }
    }
}

/// Immutable pipeline state handed to the graphics backend.
///
/// Equality and hashing cover every field of the description. Changing any
/// of them means creating a new state.
#[derive(Debug, Clone)]
pub struct PipelineState {
    description: Arc<PipelineStateDescription>,
    hash: u64,
}

impl PipelineState {
    /// Freeze `description`
    pub fn new(description: PipelineStateDescription) -> Self {
        let mut hasher = DefaultHasher::new();
        description.hash(&mut hasher);
        Self {
            hash: hasher.finish(),
            description: Arc::new(description),
        }
    }

    /// Description this state was created from
    pub fn description(&self) -> &PipelineStateDescription {
        &self.description
    }

    /// Precomputed hash of the description
    pub const fn hash_value(&self) -> u64 {
        self.hash
    }
}

impl PartialEq for PipelineState {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.description == other.description
    }
}

impl Eq for PipelineState {}

impl Hash for PipelineState {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

impl From<PipelineStateDescription> for PipelineState {
    fn from(description: PipelineStateDescription) -> Self {
        Self::new(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_matches_opaque_preset() {
        let mut description = PipelineStateDescription::alpha_blend();
        description.set_defaults();

        assert_eq!(description, PipelineStateDescription::opaque());
        assert_eq!(description.sample_mask, u32::MAX);
        assert!(!description.blend_state.is_blending());
    }

    #[test]
    fn test_equal_descriptions_give_equal_states() {
        let a = PipelineState::new(PipelineStateDescription::alpha_blend());
        let b = PipelineState::new(PipelineStateDescription::alpha_blend());

        assert_eq!(a, b);
        assert_eq!(a.hash_value(), b.hash_value());
    }

    #[test]
    fn test_any_field_change_gives_a_different_state() {
        let base = PipelineStateDescription::opaque();
        let variants = [
            PipelineStateDescription { effect_bytecode: Some(EffectBytecodeId::new(7)), ..base.clone() },
            PipelineStateDescription { blend_state: BlendStateDescription::additive(), ..base.clone() },
            PipelineStateDescription { sample_mask: 0x0f, ..base.clone() },
            PipelineStateDescription { rasterizer_state: RasterizerStateDescription::wireframe(), ..base.clone() },
            PipelineStateDescription { depth_stencil_state: DepthStencilStateDescription::none(), ..base.clone() },
            PipelineStateDescription { primitive_type: PrimitiveType::LineList, ..base.clone() },
            PipelineStateDescription {
                output: RenderOutputDescription::depth_only(PixelFormat::D32Float),
                ..base.clone()
            },
        ];

        let base_state = PipelineState::new(base);
        for variant in variants {
            assert_ne!(PipelineState::new(variant), base_state);
        }
    }

    #[test]
    fn test_color_write_channels() {
        let mut target = BlendStateRenderTargetDescription::default();
        assert_eq!(target.color_write_channels, ColorWriteChannels::ALL);

        target.color_write_channels.remove(ColorWriteChannels::ALPHA);
        assert!(target.color_write_channels.contains(ColorWriteChannels::RED | ColorWriteChannels::BLUE));
        assert_ne!(target, BlendStateRenderTargetDescription::default());
    }
}
