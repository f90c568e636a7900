// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

pub mod auth;
pub mod config;
pub mod message;
pub mod metering;
pub mod moderation;
pub mod proxy;
pub mod relay;
pub mod stream;
