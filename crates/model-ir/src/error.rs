// Copyright (c) 2025 Dimitris Kafetzis
//
// Licensed under the MIT License.
// See LICENSE file in the project root for full license information.
//
// SPDX-License-Identifier: MIT

//! Error types for network construction and loading.

/// Errors that can occur while describing or loading a network.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    /// The network manifest could not be read.
    #[error("failed to read manifest: {0}")]
    ManifestReadError(#[from] std::io::Error),

    /// The manifest JSON is malformed.
    #[error("failed to parse manifest: {0}")]
    ManifestParseError(#[from] serde_json::Error),

    /// A layer definition is inconsistent with its parents or its parameters.
    #[error("invalid layer '{layer}': {detail}")]
    InvalidLayer { layer: String, detail: String },

    /// The network as a whole is malformed.
    #[error("invalid network: {0}")]
    InvalidGraph(String),

    /// The network declares an element type the kernels cannot compute in.
    #[error("unsupported element type '{0}'")]
    UnsupportedDType(String),

    /// A weight or bias tensor could not be built.
    #[error("tensor error: {0}")]
    Tensor(#[from] tensor_core::TensorError),
}
