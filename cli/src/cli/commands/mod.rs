/*
    SPDX-License-Identifier: AGPL-3.0-or-later
    SPDX-FileCopyrightText: 2025 Shomy
*/
pub mod erase;
pub mod info;
pub mod peek;
pub mod pgpt;
pub mod read;
pub mod verify;
pub mod write;

pub use erase::EraseArgs;
pub use info::InfoArgs;
pub use peek::PeekArgs;
pub use pgpt::PgptArgs;
pub use read::ReadArgs;
pub use verify::VerifyArgs;
pub use write::WriteArgs;
