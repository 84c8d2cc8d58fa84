//! # skiff-loaders
//!
//! Built-in transpilers and preset construction for the skiff sandbox
//! bundler.
//!
//! Transpilers are the pluggable stages of a loader chain. This crate ships
//! the ones every template needs (CommonJS require discovery, JSON, style
//! injection, raw text and data-URL assets) plus the `vanilla` preset that
//! wires them to file kinds.
//!
//! ```rust,no_run
//! use skiff_core::{Manager, Services};
//! use skiff_loaders::vanilla_preset;
//!
//! let manager = Manager::new("sandbox-1", vanilla_preset(), Services::in_memory());
//! ```

mod js;
mod json;
mod raw;
mod style;
mod url;

pub use js::{CommonJsTranspiler, scan_requires};
pub use json::JsonTranspiler;
pub use raw::RawTranspiler;
pub use style::StyleTranspiler;
pub use url::UrlTranspiler;

use std::rc::Rc;

use skiff_core::preset::{LoaderEntry, Preset};
use skiff_core::transpiler::Transpiler;

/// The plain JavaScript template: CommonJS scripts, JSON, stylesheets, and
/// everything else as raw text. The url transpiler is registered for loader
/// queries but owns no extension rule.
pub fn vanilla_preset() -> Preset {
    let mut preset = Preset::new("vanilla");

    let commonjs: Rc<dyn Transpiler> = Rc::new(CommonJsTranspiler::new());
    let json: Rc<dyn Transpiler> = Rc::new(JsonTranspiler::new());
    let style: Rc<dyn Transpiler> = Rc::new(StyleTranspiler::new());
    let raw: Rc<dyn Transpiler> = Rc::new(RawTranspiler::new());

    preset.register_transpiler(Rc::new(UrlTranspiler::new()));
    preset.add_extension_rule(&["json"], vec![LoaderEntry::new(json)]);
    preset.add_extension_rule(&["css"], vec![LoaderEntry::new(style)]);
    preset.add_extension_rule(&["js", "jsx", "mjs"], vec![LoaderEntry::new(commonjs)]);
    preset.set_default_chain(vec![LoaderEntry::new(raw)]);
    preset.add_runtime_specifier("sandbox-api");

    preset
}
