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

//! Entry point for `segmerged`: parses the ambient server configuration,
//! wires up logging, and reports its startup settings. Wiring this
//! configuration into an actual DataFusion `SessionContext` and serving
//! queries over it is left to the embedding application; this binary's job
//! is limited to the ambient process bootstrap.

use segmerge_server::ServerConfig;
use tracing::info;

#[tokio::main]
async fn main() {
    let config = ServerConfig::from_args();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!(
        data_folder = %config.data_folder.display(),
        batch_size = config.batch_size,
        initial_batch_capacity = config.initial_batch_capacity,
        heap_default_capacity = config.heap_default_capacity,
        "segmerged starting"
    );
}
