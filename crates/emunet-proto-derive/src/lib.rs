//! `define_protocol!` — generates the `MsgId` registry from a flat list of message
//! categories, each naming the message structs that live in `messages::<category>`.
//!
//! Expands to:
//! - a `#[repr(u8)] MsgId` enum with values auto-assigned in declaration order
//! - `impl Message for <Type>` for every listed type, wiring it to its `MsgId` variant
//! - a type-erased `MessageKind` enum carrying the decoded payload
//! - `decode_message(msg_id, bytes) -> Result<MessageKind, ProtoError>`
//! - `MsgId::from_u8(u8) -> Option<MsgId>`

use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::{Ident, Token, braced, parse_macro_input};

struct Category {
    name: Ident,
    messages: Punctuated<Ident, Token![,]>,
}

impl Parse for Category {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let name: Ident = input.parse()?;
        input.parse::<Token![:]>()?;
        let content;
        braced!(content in input);
        let messages = content.parse_terminated(Ident::parse, Token![,])?;
        Ok(Category { name, messages })
    }
}

struct Protocol {
    categories: Punctuated<Category, Token![,]>,
}

impl Parse for Protocol {
    fn parse(input: ParseStream) -> syn::Result<Self> {
        let categories = input.parse_terminated(Category::parse, Token![,])?;
        Ok(Protocol { categories })
    }
}

#[proc_macro]
pub fn define_protocol(input: TokenStream) -> TokenStream {
    let protocol = parse_macro_input!(input as Protocol);

    let mut variant_idents = Vec::new();
    let mut variant_values = Vec::new();
    let mut module_for_variant = Vec::new();

    let mut next_value: u8 = 0;
    for category in &protocol.categories {
        for msg in &category.messages {
            variant_idents.push(msg.clone());
            variant_values.push(next_value);
            module_for_variant.push(category.name.clone());
            next_value += 1;
        }
    }

    let msg_id_variants = variant_idents.iter().zip(variant_values.iter()).map(|(ident, value)| {
        quote! { #ident = #value }
    });

    let from_u8_arms = variant_idents.iter().zip(variant_values.iter()).map(|(ident, value)| {
        quote! { #value => Some(MsgId::#ident) }
    });

    let message_impls = variant_idents.iter().zip(module_for_variant.iter()).map(|(ident, module)| {
        quote! {
            impl crate::messages::Message for crate::messages::#module::#ident {
                fn msg_id() -> MsgId {
                    MsgId::#ident
                }
            }
        }
    });

    let message_kind_variants = variant_idents.iter().zip(module_for_variant.iter()).map(|(ident, module)| {
        quote! { #ident(crate::messages::#module::#ident) }
    });

    let decode_arms = variant_idents.iter().zip(module_for_variant.iter()).map(|(ident, module)| {
        quote! {
            MsgId::#ident => {
                let payload: crate::messages::#module::#ident = postcard::from_bytes(bytes)?;
                Ok(MessageKind::#ident(payload))
            }
        }
    });

    let msg_id_count = variant_idents.len();
    let msg_id_doc = format_ident!("MsgId");

    let expanded = quote! {
        /// Wire identifier for every message type in the protocol.
        #[repr(u8)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        pub enum #msg_id_doc {
            #(#msg_id_variants),*
        }

        impl #msg_id_doc {
            /// Total number of distinct message types in the protocol.
            pub const COUNT: usize = #msg_id_count;

            /// Recover a `MsgId` from its wire byte, if it names a known message.
            pub fn from_repr(value: u8) -> Option<Self> {
                match value {
                    #(#from_u8_arms,)*
                    _ => None,
                }
            }
        }

        impl TryFrom<u8> for #msg_id_doc {
            type Error = crate::error::ProtoError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                Self::from_repr(value).ok_or(crate::error::ProtoError::UnknownMsgId(value))
            }
        }

        #(#message_impls)*

        /// A decoded message, type-erased for dispatch.
        #[derive(Debug)]
        #[allow(clippy::large_enum_variant)]
        pub enum MessageKind {
            #(#message_kind_variants),*
        }

        /// Decode a payload given its `MsgId`.
        pub fn decode_message(msg_id: #msg_id_doc, bytes: &[u8]) -> Result<MessageKind, crate::error::ProtoError> {
            match msg_id {
                #(#decode_arms)*
            }
        }
    };

    expanded.into()
}
