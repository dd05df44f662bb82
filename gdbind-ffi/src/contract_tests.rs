// Compile-time contract tests: token and struct sizes must match the engine.
// These const assertions fail at compile time if layouts drift.

use std::mem::{align_of, size_of};

use crate::api_table::InterfaceVersion;
use crate::callbacks::InitializationLevel;
use crate::error::CallError;
use crate::handles::*;
use crate::variant_type::{VariantOperator, VariantType};

const _: () = assert!(size_of::<ObjectPtr>() == 8);
const _: () = assert!(size_of::<ClassInstancePtr>() == 8);
const _: () = assert!(size_of::<MethodBindPtr>() == 8);

const _: () = assert!(size_of::<OpaqueString>() == 8);
const _: () = assert!(size_of::<OpaqueStringName>() == 8);
const _: () = assert!(size_of::<OpaqueNodePath>() == 8);
const _: () = assert!(size_of::<OpaqueArray>() == 8);
const _: () = assert!(size_of::<OpaqueDictionary>() == 8);
const _: () = assert!(size_of::<OpaqueCallable>() == 16);
const _: () = assert!(size_of::<OpaqueSignal>() == 16);
const _: () = assert!(size_of::<OpaquePackedArray>() == 16);
const _: () = assert!(size_of::<OpaqueVariant>() == 24);
const _: () = assert!(align_of::<OpaqueVariant>() == 8);

const _: () = assert!(size_of::<VariantType>() == 4);
const _: () = assert!(size_of::<VariantOperator>() == 4);
const _: () = assert!(size_of::<InitializationLevel>() == 4);
const _: () = assert!(size_of::<CallError>() == 12);
const _: () = assert!(size_of::<InterfaceVersion>() == 12);

const _: () = assert!(VariantType::PackedVector4Array as u32 == 38);
const _: () = assert!(VariantType::Object as u32 == 24);
