// SPDX-License-Identifier: GPL-3.0-only

pub mod native;

pub use native::NativePartitioner;
