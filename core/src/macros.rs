/// Implements a basic `Debug` trait for types using their type name.
///
/// Useful for handles wrapping closures, whose contents cannot be printed.
#[macro_export]
macro_rules! impl_debug {
    ($ty:ty) => {
        impl core::fmt::Debug for $ty {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(core::any::type_name::<Self>())
            }
        }
    };
}

/// Builds a [`State`](crate::State) from JSON object syntax.
///
/// # Usage
///
/// ```rust
/// use rivulet_core::state;
///
/// let initial = state! { "count": 0, "label": "Clicks" };
/// assert_eq!(initial["count"], 0);
/// ```
#[macro_export]
macro_rules! state {
    () => {
        $crate::State::new()
    };
    ($($body:tt)+) => {
        $crate::State::from_json($crate::__private::serde_json::json!({ $($body)+ }))
    };
}

/// Builds [`Props`](crate::Props) from JSON object syntax.
///
/// # Usage
///
/// ```rust
/// use rivulet_core::props;
///
/// let props = props! { "title": "Wallet" };
/// assert_eq!(props["title"], "Wallet");
/// ```
#[macro_export]
macro_rules! props {
    () => {
        $crate::Props::new()
    };
    ($($body:tt)+) => {
        $crate::Props::from_json($crate::__private::serde_json::json!({ $($body)+ }))
    };
}
