// Text: font metrics, layout, animated effects and text objects

pub mod driver;
pub mod font;
pub mod layout;
pub mod object;

pub use driver::{Driver, DriverKind};
pub use font::{Character, FontMetrics};
pub use layout::{layout_text, LayoutSettings, Line, TextAlign, TextLayout, TextMesh, TextVertex, Word};
pub use object::{TextEffect, TextId, TextObject, TextState};
