//! Storage gateways, the name codec, the listing presenter, and the
//! service tying them to user actions.

pub mod bucket_gateway;
pub mod drive_gateway;
pub mod file_service;
pub mod gateway;
pub mod local_gateway;
pub mod name_codec;
pub mod presenter;
