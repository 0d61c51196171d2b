//! Pipeline state derivation and caching

mod cache;
mod state;

pub use cache::{PipelineStateCache, PipelineStateId};
pub use state::{
    Blend, BlendFunction, BlendStateDescription, BlendStateRenderTargetDescription, ColorWriteChannels,
    CompareFunction, CullMode, DepthStencilFaceOperation, DepthStencilStateDescription, FrontFace,
    MultisampleCount, PipelineState, PipelineStateDescription, PixelFormat, PolygonMode, PrimitiveType,
    RasterizerStateDescription, RenderOutputDescription, StencilOperation, MAX_RENDER_TARGETS,
};
