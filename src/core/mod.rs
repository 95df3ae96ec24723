// Copyright (c) 2026 artrack contributors
//
// This software is released under the MIT License.
// https://opensource.org/licenses/MIT
pub mod detector;
pub mod dictionary;
pub mod posit;
