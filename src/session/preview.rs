//! Live preview attachment
//!
//! The UI layer hosts preview layers through [`PreviewSurface`]. The
//! controller only decides what the layer looks like and where it goes.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// How video is scaled into the layer bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoGravity {
    Resize,
    ResizeAspect,
    ResizeAspectFill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VideoOrientation {
    Portrait,
    PortraitUpsideDown,
    LandscapeLeft,
    LandscapeRight,
}

/// Visual sink bound to a capture session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewLayer {
    pub id: Uuid,
    pub session_id: Uuid,
    pub gravity: VideoGravity,
    pub orientation: VideoOrientation,
    pub frame: Rect,
}

/// View that can host preview layers
pub trait PreviewSurface {
    /// Viewport the preview should fill
    fn bounds(&self) -> Rect;

    /// Open a layer transaction; with `disable_actions` no implicit animation runs
    fn begin_transaction(&mut self, disable_actions: bool);

    /// Insert a layer; index 0 is the bottom-most layer
    fn insert_layer(&mut self, layer: PreviewLayer, index: usize);

    fn commit_transaction(&mut self);
}

/// Build a preview layer for `session_id` and insert it below everything
/// else on `surface`
pub(crate) fn attach(surface: &mut dyn PreviewSurface, session_id: Uuid) -> PreviewLayer {
    let layer = PreviewLayer {
        id: Uuid::new_v4(),
        session_id,
        gravity: VideoGravity::ResizeAspectFill,
        orientation: VideoOrientation::Portrait,
        frame: surface.bounds(),
    };

    surface.begin_transaction(true);
    surface.insert_layer(layer.clone(), 0);
    surface.commit_transaction();

    layer
}
