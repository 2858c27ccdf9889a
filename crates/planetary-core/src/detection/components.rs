use std::collections::HashMap;

use ndarray::Array2;

use crate::frame::Roi;

/// A 4-connected region of foreground pixels.
#[derive(Clone, Debug)]
pub struct Blob {
    /// Number of pixels in the blob.
    pub area: usize,
    pub bbox: Roi,
}

/// Label the 4-connected foreground regions of `mask` (two passes, union-find).
///
/// Returns blobs sorted by area descending (largest first); equal areas keep
/// raster order of their first pixel.
pub fn connected_components(mask: &Array2<bool>) -> Vec<Blob> {
    let (h, w) = mask.dim();
    if h == 0 || w == 0 {
        return Vec::new();
    }

    let mut labels = Array2::<u32>::zeros((h, w));
    // parent[0] is the background label and never used as a root.
    let mut parent: Vec<u32> = vec![0];

    for row in 0..h {
        for col in 0..w {
            if !mask[[row, col]] {
                continue;
            }
            let up = if row > 0 { labels[[row - 1, col]] } else { 0 };
            let left = if col > 0 { labels[[row, col - 1]] } else { 0 };

            labels[[row, col]] = match (up, left) {
                (0, 0) => {
                    let label = parent.len() as u32;
                    parent.push(label);
                    label
                }
                (l, 0) | (0, l) => l,
                (a, b) => {
                    union(&mut parent, a, b);
                    a.min(b)
                }
            };
        }
    }

    // (first-seen order, area, min_row, max_row, min_col, max_col)
    let mut regions: HashMap<u32, (usize, usize, usize, usize, usize, usize)> = HashMap::new();
    for row in 0..h {
        for col in 0..w {
            let label = labels[[row, col]];
            if label == 0 {
                continue;
            }
            let root = find(&mut parent, label);
            let order = regions.len();
            let entry = regions
                .entry(root)
                .or_insert((order, 0, row, row, col, col));
            entry.1 += 1;
            entry.2 = entry.2.min(row);
            entry.3 = entry.3.max(row);
            entry.4 = entry.4.min(col);
            entry.5 = entry.5.max(col);
        }
    }

    let mut ordered: Vec<_> = regions.into_values().collect();
    ordered.sort_unstable_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ordered
        .into_iter()
        .map(|(_, area, min_row, max_row, min_col, max_col)| Blob {
            area,
            bbox: Roi {
                x: min_col,
                y: min_row,
                width: max_col - min_col + 1,
                height: max_row - min_row + 1,
            },
        })
        .collect()
}

fn find(parent: &mut [u32], mut x: u32) -> u32 {
    while parent[x as usize] != x {
        let grandparent = parent[parent[x as usize] as usize];
        parent[x as usize] = grandparent;
        x = grandparent;
    }
    x
}

fn union(parent: &mut [u32], a: u32, b: u32) {
    let ra = find(parent, a);
    let rb = find(parent, b);
    if ra != rb {
        let (small, big) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent[big as usize] = small;
    }
}
