// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

/// Default number of workers when the caller does not size the pool.
pub(crate) const DEFAULT_WORKER_COUNT: usize = 10;

/// Bounded capacity of each worker's submission queue.
pub(crate) const MAX_WORKER_QUEUE_CAPACITY: usize = 128;

/// Default time-to-live for routing-key affinity entries.
pub(crate) const DEFAULT_AFFINITY_TTL_SECS: u64 = 30;
