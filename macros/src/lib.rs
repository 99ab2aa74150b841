use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// Derives `Address` and the offset arithmetic for a `usize` newtype.
///
/// The `Address` trait must be in scope at the derive site.
#[proc_macro_derive(AddressOps)]
pub fn derive_address_ops(item: TokenStream) -> TokenStream {
    let ast = parse_macro_input!(item as DeriveInput);
    let name = &ast.ident;

    let is_newtype = matches!(
        &ast.data,
        Data::Struct(data) if matches!(&data.fields, Fields::Unnamed(fields) if fields.unnamed.len() == 1)
    );
    if !is_newtype {
        return quote!(compile_error!("AddressOps can only be derived for a single field tuple struct");)
            .into();
    }

    let gen = quote! {
        impl Address for #name {
            fn as_raw_ptr(&self) -> usize {
                self.0
            }

            fn as_ptr<T: Sized>(&self) -> *const T {
                self.0 as *const T
            }

            fn as_mut_ptr<T: Sized>(&self) -> *mut T {
                self.0 as *mut T
            }
        }

        impl core::ops::Add<usize> for #name {
            type Output = Self;

            fn add(self, val: usize) -> Self {
                Self(self.0 + val)
            }
        }

        impl core::ops::Sub<usize> for #name {
            type Output = Self;

            fn sub(self, val: usize) -> Self {
                Self(self.0 - val)
            }
        }

        /// Distance in bytes between two addresses. `other` must not be above `self`.
        impl core::ops::Sub for #name {
            type Output = usize;

            fn sub(self, other: Self) -> usize {
                self.0 - other.0
            }
        }

        impl core::ops::AddAssign<usize> for #name {
            fn add_assign(&mut self, val: usize) {
                self.0 += val;
            }
        }

        impl core::ops::SubAssign<usize> for #name {
            fn sub_assign(&mut self, val: usize) {
                self.0 -= val;
            }
        }

        impl From<#name> for usize {
            fn from(addr: #name) -> usize {
                addr.0
            }
        }
    };

    gen.into()
}
