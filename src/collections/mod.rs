// Copyright (c) The Taskernel Developers.
// Licensed under the MIT license.

mod message_buffer;

//======================================================================================================================
// Exports
//======================================================================================================================

pub use self::message_buffer::MessageBuffer;
