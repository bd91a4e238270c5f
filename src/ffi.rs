use crate::{CacheConfig, CachePolicy, ShardCache};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::{c_char, c_int};
use std::ptr;
use tracing::warn;

type FfiCache = ShardCache<String, String>;

unsafe fn as_cache<'a>(ptr: *mut c_void) -> Option<&'a FfiCache> {
    (ptr as *const FfiCache).as_ref()
}

unsafe fn as_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Returns null if `capacity` or `shard_count` is zero.
#[no_mangle]
pub extern "C" fn cache_create(capacity: usize, shard_count: usize) -> *mut c_void {
    match FfiCache::with_config(CacheConfig::new(capacity).shard_count(shard_count)) {
        Ok(cache) => Box::into_raw(Box::new(cache)) as *mut c_void,
        Err(err) => {
            warn!(%err, "rejected cache configuration");
            ptr::null_mut()
        }
    }
}

#[no_mangle]
pub extern "C" fn cache_destroy(ptr: *mut c_void) {
    if !ptr.is_null() {
        unsafe {
            let _ = Box::from_raw(ptr as *mut FfiCache);
        }
    }
}

/// `ttl` is in seconds; zero means no expiry.
#[no_mangle]
pub extern "C" fn cache_insert(
    ptr: *mut c_void,
    key: *const c_char,
    value: *const c_char,
    ttl: u32,
) -> c_int {
    unsafe {
        let (Some(cache), Some(key), Some(value)) = (as_cache(ptr), as_str(key), as_str(value))
        else {
            return 0;
        };
        cache.insert(key.to_string(), value.to_string(), cache.ttl(ttl));
        1
    }
}

/// Copies the cached value out; free it with `cache_free_string`.
#[no_mangle]
pub extern "C" fn cache_get(ptr: *mut c_void, key: *const c_char) -> *mut c_char {
    unsafe {
        let (Some(cache), Some(key)) = (as_cache(ptr), as_str(key)) else {
            return ptr::null_mut();
        };

        match cache.get(&key.to_string()) {
            Some(handle) => match CString::new(handle.value().as_str()) {
                Ok(c_str) => c_str.into_raw(),
                Err(_) => ptr::null_mut(),
            },
            None => ptr::null_mut(),
        }
    }
}

#[no_mangle]
pub extern "C" fn cache_erase(ptr: *mut c_void, key: *const c_char) -> c_int {
    unsafe {
        let (Some(cache), Some(key)) = (as_cache(ptr), as_str(key)) else {
            return 0;
        };
        cache.erase(&key.to_string());
        1
    }
}

#[no_mangle]
pub extern "C" fn cache_prune(ptr: *mut c_void) {
    if let Some(cache) = unsafe { as_cache(ptr) } {
        cache.prune();
    }
}

#[no_mangle]
pub extern "C" fn cache_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

#[no_mangle]
pub extern "C" fn cache_len(ptr: *mut c_void) -> usize {
    match unsafe { as_cache(ptr) } {
        Some(cache) => cache.len(),
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    fn take_string(ptr: *mut c_char) -> Option<String> {
        if ptr.is_null() {
            return None;
        }
        let value = unsafe { CStr::from_ptr(ptr) }.to_str().unwrap().to_string();
        cache_free_string(ptr);
        Some(value)
    }

    #[test]
    fn test_c_api_roundtrip() {
        let cache = cache_create(16, 4);
        assert!(!cache.is_null());

        assert_eq!(cache_insert(cache, c("key1").as_ptr(), c("one").as_ptr(), 0), 1);
        assert_eq!(cache_insert(cache, c("key2").as_ptr(), c("two").as_ptr(), 60), 1);
        assert_eq!(cache_len(cache), 2);

        assert_eq!(take_string(cache_get(cache, c("key1").as_ptr())), Some("one".to_string()));
        assert_eq!(take_string(cache_get(cache, c("missing").as_ptr())), None);

        assert_eq!(cache_erase(cache, c("key1").as_ptr()), 1);
        cache_prune(cache);
        assert_eq!(cache_len(cache), 1);
        assert_eq!(take_string(cache_get(cache, c("key2").as_ptr())), Some("two".to_string()));

        cache_destroy(cache);
    }

    #[test]
    fn test_c_api_rejects_null_and_invalid_input() {
        assert!(cache_create(0, 4).is_null());
        assert!(cache_create(4, 0).is_null());

        assert_eq!(cache_insert(ptr::null_mut(), c("k").as_ptr(), c("v").as_ptr(), 0), 0);
        assert!(cache_get(ptr::null_mut(), c("k").as_ptr()).is_null());
        assert_eq!(cache_len(ptr::null_mut()), 0);
        cache_prune(ptr::null_mut());
        cache_destroy(ptr::null_mut());

        let cache = cache_create(4, 1);
        assert_eq!(cache_insert(cache, ptr::null(), c("v").as_ptr(), 0), 0);
        assert_eq!(cache_erase(cache, ptr::null()), 0);
        cache_destroy(cache);
    }
}
