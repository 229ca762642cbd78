pub mod activations;
pub mod cast_transpose;

pub use cast_transpose::{
    cast_transpose, cast_transpose_dbias, cast_transpose_dbias_dgelu, cast_transpose_dbias_owned,
    workspace_config, workspace_size_elements, CastTransposeConfig, CastTransposeDbiasOutput,
    CastTransposeOutputs, DbiasBuffers, LaunchGeometry, WorkspaceConfig,
};
