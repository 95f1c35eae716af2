//! Binary-split rectangle packer.
//!
//! Each node covers a rectangle of the canvas. A leaf accepts a glyph by
//! splitting into two children: one holding the glyph (plus whatever of the
//! rectangle it spans fully) and one for the remaining strip, separated by
//! `padding` pixels. Nodes live in an arena so the tree is a flat `Vec`.
//!
//! ```text
//!   dw > dh                      otherwise
//!   ┌─────┬─┬──────────┐         ┌────────────────┐
//!   │ g   │ │          │         │ g              │
//!   ├─────┤p│  rest    │         ├────────────────┤ p
//!   │     │ │          │         │ rest           │
//!   └─────┴─┴──────────┘         └────────────────┘
//! ```

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

#[derive(Debug, Clone)]
struct Node {
    rect: Rect,
    item: Option<usize>,
    children: Option<[usize; 2]>,
}

impl Node {
    fn leaf(rect: Rect) -> Self {
        Self { rect, item: None, children: None }
    }
}

#[derive(Debug, Clone)]
pub struct Packer {
    nodes: Vec<Node>,
    padding: u32,
    placed: usize,
}

impl Packer {
    pub fn new(width: u32, height: u32, padding: u32) -> Self {
        Self {
            nodes: vec![Node::leaf(Rect::new(0, 0, width, height))],
            padding,
            placed: 0,
        }
    }

    pub fn width(&self) -> u32 {
        self.nodes[0].rect.width
    }

    pub fn height(&self) -> u32 {
        self.nodes[0].rect.height
    }

    /// Number of items placed so far.
    pub fn placed(&self) -> usize {
        self.placed
    }

    /// Place a `width`×`height` box tagged `item`, returning its origin.
    /// A box that does not fit leaves the tree unchanged.
    pub fn insert(&mut self, width: u32, height: u32, item: usize) -> Option<(u32, u32)> {
        self.insert_at(0, width, height, item)
    }

    /// Every placed item with its rectangle.
    pub fn placements(&self) -> impl Iterator<Item = (usize, Rect)> + '_ {
        self.nodes.iter().filter_map(|n| n.item.map(|item| (item, n.rect)))
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn insert_at(&mut self, node: usize, w: u32, h: u32, item: usize) -> Option<(u32, u32)> {
        if let Some([first, second]) = self.nodes[node].children {
            return self
                .insert_at(first, w, h, item)
                .or_else(|| self.insert_at(second, w, h, item));
        }
        if self.nodes[node].item.is_some() {
            return None;
        }
        let rc = self.nodes[node].rect;
        if rc.width < w || rc.height < h {
            return None;
        }
        let pad = self.padding;

        if rc.height == h || rc.width == w {
            let rest = if rc.height == h {
                Rect::new(rc.x + w + pad, rc.y, rc.width.saturating_sub(w + pad), rc.height)
            } else {
                Rect::new(rc.x, rc.y + h + pad, rc.width, rc.height.saturating_sub(h + pad))
            };
            let glyph = self.push(Node {
                rect: Rect::new(rc.x, rc.y, w, h),
                item: Some(item),
                children: None,
            });
            let rest = self.push(Node::leaf(rest));
            self.nodes[node].children = Some([glyph, rest]);
            self.placed += 1;
            return Some((rc.x, rc.y));
        }

        let dw = rc.width - w;
        let dh = rc.height - h;
        let (first, second) = if dw > dh {
            (
                Rect::new(rc.x, rc.y, w, rc.height),
                Rect::new(rc.x + w + pad, rc.y, dw.saturating_sub(pad), rc.height),
            )
        } else {
            (
                Rect::new(rc.x, rc.y, rc.width, h),
                Rect::new(rc.x, rc.y + h + pad, rc.width, dh.saturating_sub(pad)),
            )
        };
        let first = self.push(Node::leaf(first));
        let second = self.push(Node::leaf(second));
        self.nodes[node].children = Some([first, second]);
        // `first` matches the box in one dimension, so this always succeeds.
        self.insert_at(first, w, h, item)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Whether two rects come closer than `gap` pixels on both axes.
    fn overlaps(a: Rect, b: Rect, gap: u32) -> bool {
        a.x < b.right() + gap && b.x < a.right() + gap && a.y < b.bottom() + gap && b.y < a.bottom() + gap
    }

    #[test]
    fn first_box_goes_to_origin() {
        let mut packer = Packer::new(64, 64, 1);
        assert_eq!(packer.insert(10, 12, 0), Some((0, 0)));
        assert_eq!(packer.placed(), 1);
    }

    #[test]
    fn exact_fit() {
        let mut packer = Packer::new(16, 16, 1);
        assert_eq!(packer.insert(16, 16, 0), Some((0, 0)));
        assert_eq!(packer.insert(1, 1, 1), None);
    }

    #[test]
    fn too_large_is_rejected_without_mutation() {
        let mut packer = Packer::new(32, 32, 1);
        packer.insert(8, 8, 0);
        let nodes = packer.nodes.len();
        assert_eq!(packer.insert(40, 4, 1), None);
        assert_eq!(packer.insert(4, 33, 2), None);
        assert_eq!(packer.nodes.len(), nodes);
        assert_eq!(packer.placed(), 1);
    }

    #[test]
    fn placements_never_overlap_and_respect_padding() {
        let mut packer = Packer::new(128, 128, 1);
        let mut boxes = Vec::new();
        for i in 0..200u32 {
            let w = 3 + (i * 7) % 13;
            let h = 4 + (i * 5) % 11;
            boxes.push((w, h));
        }
        boxes.sort_by(|a, b| b.1.cmp(&a.1).then(b.0.cmp(&a.0)));
        for (i, (w, h)) in boxes.iter().enumerate() {
            packer.insert(*w, *h, i);
        }

        let placed: Vec<(usize, Rect)> = packer.placements().collect();
        assert_eq!(placed.len(), packer.placed());
        assert!(placed.len() > 50);
        for (i, (_, a)) in placed.iter().enumerate() {
            assert!(a.right() <= 128 && a.bottom() <= 128, "{a:?} outside canvas");
            for (_, b) in &placed[i + 1..] {
                assert!(!overlaps(*a, *b, 1), "{a:?} and {b:?} closer than padding");
            }
        }
    }

    #[test]
    fn items_keep_their_tags() {
        let mut packer = Packer::new(64, 64, 0);
        packer.insert(10, 10, 7);
        packer.insert(5, 10, 3);
        let mut tags: Vec<usize> = packer.placements().map(|(t, _)| t).collect();
        tags.sort();
        assert_eq!(tags, vec![3, 7]);
    }
}
