/// Read-through caching for async computations returning `AppResult`.
///
/// Looks `$key` up in `$cache`; on a hit the cached value is returned. On a
/// miss the key's generation is read, `$block` is awaited, and its value queued
/// for a background refill with a TTL of `$ttl` seconds. The refill is dropped
/// if the key was replaced while `$block` ran. Errors from either side
/// propagate with `?`, so the macro must be used inside a function returning
/// `AppResult`.
///
/// # Example
/// ```rust,ignore
/// let top: Vec<TopMovie> = cached!(cache, CacheKey::TopMovies, TOP_MOVIES_TTL, async {
///     store.scan(Some(MAX_TOP_MOVIES)).await
/// })?;
/// ```
#[macro_export]
macro_rules! cached {
    ($cache:expr, $key:expr, $ttl:expr, $block:expr) => {{
        match $cache.get_from_cache(&$key).await? {
            Some(hit) => $crate::error::AppResult::Ok(hit),
            None => {
                let generation = $cache.generation(&$key).await?;
                let value = $block.await?;
                $cache.set_in_background(&$key, &value, $ttl, generation);
                $crate::error::AppResult::Ok(value)
            }
        }
    }};
}
