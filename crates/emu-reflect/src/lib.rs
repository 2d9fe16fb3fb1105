//! Named-field introspection for configuration and state objects.
//!
//! Option structs and state snapshots declare their fields once, through
//! [`declare_fields!`]; thereafter hosts can enumerate, get and set fields
//! by name, accept loosely-typed user input through [`fuzzy_set`], and
//! round-trip whole objects through the BSON-style document format of
//! [`serialise`]/[`deserialise`].

mod bson;
mod value;

pub use bson::{deserialise, serialise};
pub use value::Value;

/// Description of the values a reflectable enum can take.
pub struct EnumInfo {
    pub name: &'static str,
    pub members: &'static [&'static str],
}

/// An object whose fields can be enumerated, read and written by name.
pub trait Reflectable {
    /// All declared field names, in declaration order.
    fn field_names(&self) -> &'static [&'static str];

    /// The current value of `name`, or `None` if undeclared.
    fn get(&self, name: &str) -> Option<Value>;

    /// Sets `name` from `value`, applying the limited conversions described
    /// on [`FieldValue::from_value`]. Returns `false` if the field is
    /// undeclared, the value inconvertible, or outside the field's permitted
    /// set.
    fn set_field(&mut self, name: &str, value: &Value) -> bool;

    /// For enum-valued fields: the permitted member names. `None` for
    /// non-enum fields and undeclared names.
    fn values_for(&self, name: &str) -> Option<&'static [&'static str]> {
        let _ = name;
        None
    }

    /// Per-object allowlist hook consulted by `serialise`.
    fn should_serialise(&self, name: &str) -> bool {
        let _ = name;
        true
    }
}

/// Attempts to set `name` on `target`; a convenience over
/// [`Reflectable::set_field`] accepting anything convertible to a [`Value`].
pub fn set<T: Reflectable + ?Sized>(target: &mut T, name: &str, value: impl Into<Value>) -> bool {
    target.set_field(name, &value.into())
}

/// Sets a field from user-supplied text.
///
/// Tries, in order: the exact or case-insensitive name of an enum member,
/// yes/no/y/n/true/false for bools, integer parsing (decimal, `0x` or `$`
/// hex), then float parsing.
pub fn fuzzy_set<T: Reflectable + ?Sized>(target: &mut T, name: &str, text: &str) -> bool {
    let text = text.trim();

    if let Some(members) = target.values_for(name) {
        if let Some(&member) = members
            .iter()
            .find(|member| member.eq_ignore_ascii_case(text))
        {
            return target.set_field(name, &Value::Enum(member));
        }
        return false;
    }

    match text.to_ascii_lowercase().as_str() {
        "yes" | "y" | "true" => {
            if target.set_field(name, &Value::Bool(true)) {
                return true;
            }
        }
        "no" | "n" | "false" => {
            if target.set_field(name, &Value::Bool(false)) {
                return true;
            }
        }
        _ => {}
    }

    let parsed_int = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix('$')) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        text.parse::<i64>().ok()
    };
    if let Some(int) = parsed_int {
        if target.set_field(name, &Value::I64(int)) {
            return true;
        }
    }

    if let Ok(float) = text.parse::<f64>() {
        if target.set_field(name, &Value::F64(float)) {
            return true;
        }
    }

    false
}

/// A type that can act as a declared field.
///
/// `from_value` performs the conversions the name-based setters promise:
/// integers convert between widths by truncation, strings convert to enum
/// members by name, anything else requires the matching variant.
pub trait FieldValue: Sized {
    fn to_value(&self) -> Value;
    fn from_value(value: &Value) -> Option<Self>;
    fn enum_info() -> Option<&'static EnumInfo> {
        None
    }
}

macro_rules! impl_int_field {
    ($($t:ty),+) => {$(
        impl FieldValue for $t {
            fn to_value(&self) -> Value {
                Value::I64(*self as i64)
            }

            fn from_value(value: &Value) -> Option<Self> {
                value.as_i64().map(|v| v as $t)
            }
        }
    )+};
}

impl_int_field!(u8, u16, u32, u64, i8, i16, i32, i64);

impl FieldValue for bool {
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl FieldValue for f32 {
    fn to_value(&self) -> Value {
        Value::F64(f64::from(*self))
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64().map(|v| v as f32)
    }
}

impl FieldValue for f64 {
    fn to_value(&self) -> Value {
        Value::F64(*self)
    }

    fn from_value(value: &Value) -> Option<Self> {
        value.as_f64()
    }
}

impl FieldValue for String {
    fn to_value(&self) -> Value {
        Value::String(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Enum(name) => Some((*name).to_string()),
            _ => None,
        }
    }
}

impl FieldValue for Vec<u8> {
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(bytes) => Some(bytes.clone()),
            _ => None,
        }
    }
}

/// Declares an enum whose members are visible to reflection.
///
/// Generates the enum itself, member-name tables, by-name lookup and a
/// [`FieldValue`] implementation so the enum can be used directly as a
/// declared field.
#[macro_export]
macro_rules! reflectable_enum {
    ($(#[$meta:meta])* $vis:vis enum $name:ident { $($member:ident),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        $vis enum $name {
            $($member),+
        }

        impl $name {
            pub const INFO: $crate::EnumInfo = $crate::EnumInfo {
                name: stringify!($name),
                members: &[$(stringify!($member)),+],
            };

            #[must_use]
            $vis fn name(self) -> &'static str {
                match self {
                    $(Self::$member => stringify!($member)),+
                }
            }

            #[must_use]
            $vis fn from_name(name: &str) -> Option<Self> {
                match name {
                    $(stringify!($member) => Some(Self::$member),)+
                    _ => None,
                }
            }

            #[must_use]
            $vis fn from_name_insensitive(name: &str) -> Option<Self> {
                Self::INFO
                    .members
                    .iter()
                    .position(|member| member.eq_ignore_ascii_case(name))
                    .and_then(|index| Self::from_name(Self::INFO.members[index]))
            }
        }

        impl $crate::FieldValue for $name {
            fn to_value(&self) -> $crate::Value {
                $crate::Value::Enum(self.name())
            }

            fn from_value(value: &$crate::Value) -> Option<Self> {
                match value {
                    $crate::Value::Enum(name) => Self::from_name(name),
                    $crate::Value::String(name) => Self::from_name(name),
                    $crate::Value::I64(index) => {
                        let index = usize::try_from(*index).ok()?;
                        Self::INFO.members.get(index).and_then(|name| Self::from_name(name))
                    }
                    _ => None,
                }
            }

            fn enum_info() -> Option<&'static $crate::EnumInfo> {
                Some(&Self::INFO)
            }
        }
    };
}

/// Implements [`Reflectable`] for a struct, one line per field.
///
/// An enum-valued field may narrow its permitted member set with
/// `limited_to [A, B, …]`; sets outside the list are rejected.
#[macro_export]
macro_rules! declare_fields {
    ($ty:ty {
        $($field:ident $(limited_to [$($limit:ident),+])?),+ $(,)?
    }) => {
        impl $crate::Reflectable for $ty {
            fn field_names(&self) -> &'static [&'static str] {
                &[$(stringify!($field)),+]
            }

            fn get(&self, name: &str) -> Option<$crate::Value> {
                match name {
                    $(stringify!($field) => Some($crate::FieldValue::to_value(&self.$field)),)+
                    _ => None,
                }
            }

            fn set_field(&mut self, name: &str, value: &$crate::Value) -> bool {
                match name {
                    $(stringify!($field) => {
                        let Some(converted) = $crate::FieldValue::from_value(value) else {
                            return false;
                        };
                        $(
                            // Enforce the narrowed member set for this field.
                            {
                                let permitted = [$(stringify!($limit)),+];
                                let chosen = $crate::FieldValue::to_value(&converted);
                                if let $crate::Value::Enum(chosen) = chosen {
                                    if !permitted.contains(&chosen) {
                                        return false;
                                    }
                                }
                            }
                        )?
                        self.$field = converted;
                        true
                    })+
                    _ => false,
                }
            }

            fn values_for(&self, name: &str) -> Option<&'static [&'static str]> {
                match name {
                    $(stringify!($field) => {
                        $(return Some(&[$(stringify!($limit)),+]);)?
                        #[allow(unreachable_code)]
                        {
                            fn info_of<T: $crate::FieldValue>(_: &T) -> Option<&'static $crate::EnumInfo> {
                                T::enum_info()
                            }
                            info_of(&self.$field).map(|info| info.members)
                        }
                    })+
                    _ => None,
                }
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    reflectable_enum! {
        pub enum DisplayType { Rgb, CompositeColour, CompositeMonochrome }
    }

    #[derive(Debug, PartialEq)]
    struct Options {
        output: DisplayType,
        quickload: bool,
        volume: u8,
    }

    declare_fields!(Options {
        output,
        quickload,
        volume,
    });

    fn options() -> Options {
        Options {
            output: DisplayType::Rgb,
            quickload: false,
            volume: 128,
        }
    }

    #[test]
    fn get_reports_declared_fields() {
        let options = options();
        assert_eq!(options.get("output"), Some(Value::Enum("Rgb")));
        assert_eq!(options.get("quickload"), Some(Value::Bool(false)));
        assert_eq!(options.get("missing"), None);
    }

    #[test]
    fn set_accepts_enum_by_string_name() {
        let mut options = options();
        assert!(set(&mut options, "output", "CompositeColour"));
        assert_eq!(options.output, DisplayType::CompositeColour);
    }

    #[test]
    fn set_truncates_wide_integers() {
        let mut options = options();
        assert!(set(&mut options, "volume", 0x1_42i64));
        assert_eq!(options.volume, 0x42);
    }

    #[test]
    fn set_rejects_type_mismatch() {
        let mut options = options();
        assert!(!set(&mut options, "quickload", 3i64));
        assert!(!options.quickload);
    }

    #[test]
    fn fuzzy_set_is_case_insensitive_for_enums() {
        let mut options = options();
        assert!(fuzzy_set(&mut options, "output", "compositemonochrome"));
        assert_eq!(options.output, DisplayType::CompositeMonochrome);
    }

    #[test]
    fn fuzzy_set_maps_yes_and_no() {
        let mut options = options();
        assert!(fuzzy_set(&mut options, "quickload", "yes"));
        assert!(options.quickload);
        assert!(fuzzy_set(&mut options, "quickload", "No"));
        assert!(!options.quickload);
    }

    #[test]
    fn fuzzy_set_parses_hex_integers() {
        let mut options = options();
        assert!(fuzzy_set(&mut options, "volume", "$7f"));
        assert_eq!(options.volume, 0x7F);
    }

    #[derive(Debug, PartialEq)]
    struct Restricted {
        output: DisplayType,
    }

    declare_fields!(Restricted {
        output limited_to [Rgb, CompositeColour],
    });

    #[test]
    fn limited_enum_rejects_out_of_set_members() {
        let mut restricted = Restricted {
            output: DisplayType::Rgb,
        };
        assert!(!set(&mut restricted, "output", "CompositeMonochrome"));
        assert_eq!(restricted.output, DisplayType::Rgb);
        assert!(set(&mut restricted, "output", "CompositeColour"));
        assert_eq!(
            restricted.values_for("output"),
            Some(&["Rgb", "CompositeColour"][..])
        );
    }
}
