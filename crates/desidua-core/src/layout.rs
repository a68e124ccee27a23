//! Tile geometry for the two call layouts. Sizes are in density-independent
//! pixels of the host viewport.

use crate::presence::Tile;

const GALLERY_SINGLE_PADDING: u32 = 24;
const GALLERY_GRID_PADDING: u32 = 36;

pub const THUMBNAIL_WIDTH: u32 = 120;
pub const THUMBNAIL_HEIGHT: u32 = 90;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ViewMode {
    #[default]
    Gallery,
    Speaker,
}

impl ViewMode {
    pub fn toggled(self) -> Self {
        match self {
            Self::Gallery => Self::Speaker,
            Self::Speaker => Self::Gallery,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GalleryLayout {
    pub columns: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

impl GalleryLayout {
    /// Up to two tiles stack full-width at 16:9; more go two-up at 4:3.
    pub fn compute(tile_count: usize, viewport_width: u32) -> Self {
        if tile_count <= 2 {
            let tile_width = viewport_width.saturating_sub(GALLERY_SINGLE_PADDING);
            Self {
                columns: 1,
                tile_width,
                tile_height: scale_rounded(tile_width, 9, 16),
            }
        } else {
            let tile_width = viewport_width.saturating_sub(GALLERY_GRID_PADDING) / 2;
            Self {
                columns: 2,
                tile_width,
                tile_height: scale_rounded(tile_width, 3, 4),
            }
        }
    }
}

/// `value * num / den`, rounded half up.
fn scale_rounded(value: u32, num: u32, den: u32) -> u32 {
    let scaled = u64::from(value) * u64::from(num) * 2 + u64::from(den);
    (scaled / (u64::from(den) * 2)) as u32
}

/// First tile takes the main area, the rest float as thumbnails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpeakerLayout {
    pub main: Option<Tile>,
    pub thumbnails: Vec<Tile>,
}

impl SpeakerLayout {
    pub fn split(tiles: &[Tile]) -> Self {
        match tiles.split_first() {
            Some((main, rest)) => Self {
                main: Some(main.clone()),
                thumbnails: rest.to_vec(),
            },
            None => Self::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::presence::project;
    use crate::testing::sample_snapshot;

    #[test]
    fn two_tiles_single_column_widescreen() {
        let layout = GalleryLayout::compute(2, 390);
        assert_eq!(layout.columns, 1);
        assert_eq!(layout.tile_width, 366);
        // 366 * 9 / 16 = 205.875
        assert_eq!(layout.tile_height, 206);
    }

    #[test]
    fn three_tiles_two_columns_four_by_three() {
        let layout = GalleryLayout::compute(3, 390);
        assert_eq!(layout.columns, 2);
        assert_eq!(layout.tile_width, 177);
        // 177 * 3 / 4 = 132.75
        assert_eq!(layout.tile_height, 133);
    }

    #[test]
    fn tiny_viewport_does_not_underflow() {
        let layout = GalleryLayout::compute(5, 10);
        assert_eq!(layout.tile_width, 0);
        assert_eq!(layout.tile_height, 0);
    }

    #[test]
    fn speaker_split_keeps_order() {
        let tiles = project(&sample_snapshot()).tiles;
        let layout = SpeakerLayout::split(&tiles);
        assert_eq!(layout.main.as_ref().map(|t| t.key.as_str()), Some("TR_local_cam"));
        assert_eq!(layout.thumbnails.len(), 2);
        assert_eq!(layout.thumbnails[0].key, "TR_p1_cam");
    }

    #[test]
    fn speaker_split_empty() {
        assert_eq!(SpeakerLayout::split(&[]), SpeakerLayout::default());
    }

    #[test]
    fn view_mode_toggles() {
        assert_eq!(ViewMode::default().toggled(), ViewMode::Speaker);
        assert_eq!(ViewMode::Speaker.toggled(), ViewMode::Gallery);
    }
}
