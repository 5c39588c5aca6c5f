//! Resource Config Module
//!
//! On-disk resource config files: where they live and what they contain.

mod path;
mod render;

pub use path::{
    parse_resource_name, resolve_config_path, ConfigLayout, CONFIG_EXTENSION, DEFAULT_CONFIG_DIR,
};
pub use render::{
    parse_rendered, render_spec, ConfigRenderer, HostSpec, ParseError, RenderSettings, ResourceSpec,
};
