// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod admin_api_test;
pub mod fetcher_test;
pub mod helpers;
pub mod recrawl_test;
pub mod scenarios_test;
pub mod store_contract_test;
