/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod cancel;
pub mod chipinfo;
pub mod dialect;
pub mod partition;
pub mod region;
pub mod storage;
