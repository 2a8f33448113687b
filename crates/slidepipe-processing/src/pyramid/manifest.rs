use super::layout::DziLayout;

const DEEPZOOM_NAMESPACE: &str = "http://schemas.microsoft.com/deepzoom/2008";

/// The `.dzi` descriptor a viewer loads before requesting tiles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DziManifest {
    pub format: String,
    pub overlap: u32,
    pub tile_size: u32,
    pub width: u32,
    pub height: u32,
}

impl DziManifest {
    pub fn from_layout(layout: &DziLayout, format: &str) -> Self {
        Self {
            format: format.to_string(),
            overlap: layout.overlap(),
            tile_size: layout.tile_size(),
            width: layout.width(),
            height: layout.height(),
        }
    }

    pub fn to_xml(&self) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
             <Image xmlns=\"{}\" Format=\"{}\" Overlap=\"{}\" TileSize=\"{}\">\n  \
             <Size Width=\"{}\" Height=\"{}\"/>\n\
             </Image>\n",
            DEEPZOOM_NAMESPACE, self.format, self.overlap, self.tile_size, self.width, self.height
        )
    }
}
