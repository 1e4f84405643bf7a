use dioxus::prelude::*;

#[component]
pub fn Spinner(size: u32) -> Element {
    rsx! {
        span {
            class: "spinner",
            style: "width: {size}px; height: {size}px;",
        }
    }
}
