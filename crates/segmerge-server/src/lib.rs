/* Copyright 2024 The Segmerge Contributors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

//! The compressed-chunk scan server: the query operator itself plus the
//! ambient catalog and ingest paths that surround it in a complete system.

pub mod catalog;
pub mod config;
pub mod ingest;
pub mod query;
pub mod test_util;

pub use config::ServerConfig;
pub use query::CompressedChunkScanExec;
