//! Compiled-in server public key used when the key endpoint is unreachable

/// Bump whenever `FALLBACK_PUBLIC_KEY_PEM` is replaced; logged on every fallback
pub const FALLBACK_KEY_VERSION: &str = "2024.1";

pub const FALLBACK_PUBLIC_KEY_PEM: &str = "\
-----BEGIN PUBLIC KEY-----\n\
MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEArF0ZK+DAyTwsGYtHmsIN\n\
VrKFu3Xk0EllN7HDYt+xjjwoeWHHUhxJ/cQM6HTYZTPrOagYPGarLOEThm7kl9nQ\n\
/wrGhC8hu14HCdE9TiGy0D8MbbLSujvT4TDU35Exc18G/ANxHvr9iDd2iMwrcf4+\n\
goBgdYLxO027s/eQzKm4rZlnrO2iG1IJmIVGdQDqSNZQzTruRrtNQLqmxqYAT5vk\n\
u3CaKi2wI3uo2EJ1w+8iVrYYyorqRjVZYjpzxPRuquGOaQtJ+68v1BZk4fP+ptu8\n\
HFFBnc7htgU5lEq4KLAZuKRXOA07UrObeQoYLug6Ra4sQg6YUGAQAndbkasL36nx\n\
8QIDAQAB\n\
-----END PUBLIC KEY-----\n\
";
