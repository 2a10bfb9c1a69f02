//! Traversal helpers over the structural model.

use crate::tags::{subfile_type, Tag, TagSet};
use crate::tiff::ifd::{Ifd, TiffInfo};

/// Largest pixel count an IFD may have and still be considered for
/// thumbnail extraction.
pub const MAX_PIXELS: u64 = 1_000_000_000;

/// A non-pointer tag entry encountered during traversal, together with the
/// namespace it lives in and the IFD holding it.
#[derive(Debug, Clone, Copy)]
pub struct TagEntryRef<'a> {
    pub tag_set: TagSet,
    pub tag_id: u16,
    pub ifd: &'a Ifd,
}

/// Every IFD of the tree in deletion-safe order: each IFD's sub-IFD forest
/// precedes the IFD itself, so a consumer shrinking parent lists never
/// invalidates what is still to come.
pub fn ifds_depth_first(ifds: &[Ifd]) -> Vec<&Ifd> {
    let mut out = Vec::new();
    collect_ifds(ifds, &mut out);
    out
}

fn collect_ifds<'a>(ifds: &'a [Ifd], out: &mut Vec<&'a Ifd>) {
    for ifd in ifds {
        for entry in ifd.entries.values() {
            for chain in &entry.sub_ifds {
                collect_ifds(chain, out);
            }
        }
        out.push(ifd);
    }
}

/// Every non-pointer tag entry of the tree, in sorted tag-id order per IFD,
/// recursing into pointer entries with the namespace they imply.
pub fn iter_tag_entries(ifds: &[Ifd], tag_set: TagSet) -> Vec<TagEntryRef<'_>> {
    let mut out = Vec::new();
    collect_tag_entries(ifds, tag_set, &mut out);
    out
}

fn collect_tag_entries<'a>(ifds: &'a [Ifd], tag_set: TagSet, out: &mut Vec<TagEntryRef<'a>>) {
    for ifd in ifds {
        for (&tag_id, entry) in &ifd.entries {
            if entry.is_pointer() {
                let pointed = tag_set.pointed_set(tag_id);
                for chain in &entry.sub_ifds {
                    collect_tag_entries(chain, pointed, out);
                }
            } else {
                out.push(TagEntryRef {
                    tag_set,
                    tag_id,
                    ifd,
                });
            }
        }
    }
}

/// Determine if an IFD represents a tiled image.
pub fn is_tiled(ifd: &Ifd) -> bool {
    ifd.contains(Tag::TileWidth)
}

/// Classify a non-tiled IFD as one of the associated image kinds in
/// `candidates` (e.g. `macro`, `label`).
///
/// The `ImageDescription` text is consulted first; failing that, the
/// `NewSubfileType` bitmask: ReducedImage|Macro marks a macro, a bare
/// ReducedImage value marks a label.
pub fn associated_image_key(ifd: &Ifd, candidates: &[&str]) -> Option<String> {
    if let Some(description) = ifd.ascii_value(Tag::ImageDescription) {
        for key in candidates {
            if description.contains(key) {
                return Some((*key).to_string());
            }
        }
    }
    if let Some(subfile) = ifd.long_value(Tag::NewSubfileType) {
        let subfile = u32::try_from(subfile).unwrap_or(0);
        if subfile & subfile_type::REDUCED_IMAGE != 0 && subfile & subfile_type::MACRO != 0 {
            return Some("macro".to_string());
        }
        if subfile == subfile_type::REDUCED_IMAGE {
            return Some("label".to_string());
        }
    }
    None
}

/// Pick the tiled IFD best suited for a thumbnail of at least
/// `(min_width, min_height)` pixels.
///
/// Among tiled IFDs no larger than [`MAX_PIXELS`], the smallest one at
/// least as large as the request wins; if none is large enough, the
/// smallest available. Ties resolve to the earlier IFD in document order.
pub fn thumbnail_ifd(info: &TiffInfo, min_width: u64, min_height: u64) -> Option<&Ifd> {
    let mut best: Option<(&Ifd, u64, bool)> = None;
    for ifd in ifds_depth_first(&info.ifds) {
        if !is_tiled(ifd) {
            continue;
        }
        let Some((width, height)) = ifd.dimensions() else {
            continue;
        };
        let pixels = width * height;
        if pixels > MAX_PIXELS {
            continue;
        }
        let large_enough = width >= min_width && height >= min_height;
        best = match best {
            None => Some((ifd, pixels, large_enough)),
            Some((_, best_pixels, best_large)) => {
                // A candidate that satisfies the minimum beats any that does
                // not; within the same class, fewer pixels wins.
                let better = (large_enough && !best_large)
                    || (large_enough == best_large && pixels < best_pixels);
                if better {
                    Some((ifd, pixels, large_enough))
                } else {
                    best
                }
            }
        };
    }
    best.map(|(ifd, _, _)| ifd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tags::Type;
    use crate::tiff::ifd::{Entry, Value};
    use std::path::PathBuf;

    fn tiled_ifd(offset: u64, width: u32, height: u32) -> Ifd {
        let mut ifd = Ifd::new();
        ifd.offset = offset;
        ifd.insert(Tag::ImageWidth, Entry::longs(vec![width]));
        ifd.insert(Tag::ImageLength, Entry::longs(vec![height]));
        ifd.insert(Tag::TileWidth, Entry::longs(vec![256]));
        ifd
    }

    fn info(ifds: Vec<Ifd>) -> TiffInfo {
        TiffInfo {
            source: PathBuf::from("test.tif"),
            byte_order: crate::tiff::stream::ByteOrder::LittleEndian,
            big_tiff: false,
            ifds,
        }
    }

    #[test]
    fn depth_first_yields_children_before_parents() {
        let mut parent = tiled_ifd(100, 64, 64);
        let child = tiled_ifd(200, 32, 32);
        let mut entry = Entry::new(Type::IFD, Value::Ifds(vec![200]));
        entry.sub_ifds.push(vec![child]);
        parent.insert(Tag::SubIfd, entry);

        let order: Vec<u64> = ifds_depth_first(std::slice::from_ref(&parent))
            .iter()
            .map(|ifd| ifd.offset)
            .collect();
        assert_eq!(order, vec![200, 100]);
    }

    #[test]
    fn macro_detected_from_description() {
        let mut ifd = Ifd::new();
        ifd.insert(Tag::ImageDescription, Entry::ascii("Aperio macro image"));
        assert_eq!(
            associated_image_key(&ifd, &["macro", "label"]),
            Some("macro".to_string())
        );
    }

    #[test]
    fn macro_detected_from_subfile_bits() {
        let mut ifd = Ifd::new();
        ifd.insert(
            Tag::NewSubfileType,
            Entry::longs(vec![subfile_type::REDUCED_IMAGE | subfile_type::MACRO]),
        );
        assert_eq!(
            associated_image_key(&ifd, &["macro", "label"]),
            Some("macro".to_string())
        );
    }

    #[test]
    fn label_detected_from_subfile_value() {
        let mut ifd = Ifd::new();
        ifd.insert(Tag::NewSubfileType, Entry::longs(vec![1]));
        assert_eq!(associated_image_key(&ifd, &[]), Some("label".to_string()));
    }

    #[test]
    fn unclassified_ifd_has_no_key() {
        let mut ifd = Ifd::new();
        ifd.insert(Tag::ImageDescription, Entry::ascii("just pixels"));
        assert_eq!(associated_image_key(&ifd, &["macro", "label"]), None);
    }

    #[test]
    fn thumbnail_prefers_smallest_sufficient_ifd() {
        let info = info(vec![
            tiled_ifd(1, 4096, 4096),
            tiled_ifd(2, 1024, 1024),
            tiled_ifd(3, 128, 128),
        ]);
        let chosen = thumbnail_ifd(&info, 512, 512).unwrap();
        assert_eq!(chosen.offset, 2);
    }

    #[test]
    fn thumbnail_falls_back_to_smallest() {
        let info = info(vec![tiled_ifd(1, 256, 256), tiled_ifd(2, 128, 128)]);
        let chosen = thumbnail_ifd(&info, 512, 512).unwrap();
        assert_eq!(chosen.offset, 2);
    }

    #[test]
    fn thumbnail_ignores_oversized_ifds() {
        let info = info(vec![tiled_ifd(1, 100_000, 100_000)]);
        assert!(thumbnail_ifd(&info, 64, 64).is_none());
    }
}
