// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use rand::Rng;

/// `len` random lowercase latin letters, used for locally issued ids.
pub fn lowercase_suffix(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| {
            let idx = rng.random_range(0..26u8);
            (b'a' + idx) as char
        })
        .collect()
}
