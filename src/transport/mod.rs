// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

mod buffer;
mod channel;
mod device;

pub(crate) use buffer::Region;
pub use buffer::{InputStreamBuffer, OutputStreamBuffer};
pub use channel::{insert_channel, ChannelOstream, ErrorFn, MessageFn};
pub use device::{restore_cloexec, share_with_child, Device};
